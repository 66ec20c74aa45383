//! Policy gate applied before any build-phase invocation.

use crate::core::types::ActionProposal;

/// First configured keyword contained in `plan_text`, compared case-insensitively.
///
/// Blank keywords are ignored so an empty entry cannot reject every plan.
pub fn find_forbidden_keyword<'a, S: AsRef<str>>(
    plan_text: &str,
    keywords: &'a [S],
) -> Option<&'a str> {
    let lowered = plan_text.to_lowercase();
    keywords
        .iter()
        .map(|keyword| keyword.as_ref())
        .filter(|keyword| !keyword.trim().is_empty())
        .find(|keyword| lowered.contains(&keyword.to_lowercase()))
}

pub fn is_forbidden<S: AsRef<str>>(plan_text: &str, keywords: &[S]) -> bool {
    find_forbidden_keyword(plan_text, keywords).is_some()
}

/// A plan may proceed only if it carries at least one structured action.
pub fn is_executable(actions: &[ActionProposal]) -> bool {
    !actions.is_empty()
}
