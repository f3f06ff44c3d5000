//! Method-name conventions: `module.function` names and the async
//! pseudo-methods derived from them.

/// Suffix of the pseudo-method that submits a job.
pub const ASYNC_SUFFIX: &str = "_async";
/// Suffix of the pseudo-method that polls a job.
pub const CHECK_SUFFIX: &str = "_check";

/// Job service operations.
pub const RUN_JOB: &str = "KBaseJobService.run_job";
pub const CHECK_JOB: &str = "KBaseJobService.check_job";

/// Split `module.function` on the first separator.
pub fn split_method(name: &str) -> (Option<&str>, &str) {
    match name.split_once('.') {
        Some((module, function)) => (Some(module), function),
        None => (None, name),
    }
}

/// Which side of the job bridge a pseudo-method addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoKind {
    Submit,
    Check,
}

/// Recognise `<method>_async` / `<method>_check` and return the kind and the
/// underlying method name. Does not consult any registry.
pub fn parse_pseudo(name: &str) -> Option<(PseudoKind, &str)> {
    if let Some(target) = name.strip_suffix(ASYNC_SUFFIX) {
        return (!target.is_empty()).then_some((PseudoKind::Submit, target));
    }
    if let Some(target) = name.strip_suffix(CHECK_SUFFIX) {
        return (!target.is_empty()).then_some((PseudoKind::Check, target));
    }
    None
}
