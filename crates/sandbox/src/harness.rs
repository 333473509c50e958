pub(crate) const RESULT_MARK: &str = "@@RESULT@@";
pub(crate) const FAULT_MARK: &str = "@@FAULT@@";

/// Runner script written next to the candidate. Loads the JSON-encoded
/// arguments, imports the candidate module and emits exactly one marked
/// line: a result payload or a captured fault. Import-time errors in the
/// candidate are faults too, not harness crashes.
pub(crate) fn harness_source(entry: &str) -> String {
    format!(
        r#"import json
import sys

# Isolated mode strips the working directory from sys.path; put it back so
# the candidate module next to this runner is importable.
sys.path.insert(0, ".")


def _emit(tag, payload):
    sys.stdout.write(tag + json.dumps(payload))
    sys.stdout.flush()


with open("input.json", "r") as handle:
    _args = json.load(handle)

try:
    import tool
    _fn = getattr(tool, "{entry}")
except Exception as exc:
    _emit("{fault}", {{"kind": type(exc).__name__, "message": str(exc)}})
    sys.exit(0)

try:
    _emit("{result}", _fn(*_args))
except Exception as exc:
    _emit("{fault}", {{"kind": type(exc).__name__, "message": str(exc)}})
"#,
        entry = entry,
        result = RESULT_MARK,
        fault = FAULT_MARK,
    )
}
