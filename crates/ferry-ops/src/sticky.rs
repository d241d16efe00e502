//! Resolver wrapper remembering "skip all" answers.

use std::collections::HashSet;

use ferry_core::{ErrorCategory, ErrorResolver, Prompt, Resolution, VfsError};
use tracing::{debug, error};

/// Wraps the caller's resolver for the lifetime of one job.
///
/// Once `SkipAll` is answered for a category, later prompts of that category are
/// answered with `Skip` without asking again. Answers a prompt did not offer are
/// replaced by `Skip`, or `Abort` when skipping is not offered either.
pub(crate) struct StickyResolver<'a> {
    inner: &'a mut dyn ErrorResolver,
    skip_all: HashSet<ErrorCategory>,
    prompts: usize,
}

impl<'a> StickyResolver<'a> {
    pub fn new(inner: &'a mut dyn ErrorResolver) -> Self {
        Self {
            inner,
            skip_all: HashSet::new(),
            prompts: 0,
        }
    }

    /// Number of prompts forwarded to the wrapped resolver.
    pub fn prompts(&self) -> usize {
        self.prompts
    }
}

impl ErrorResolver for StickyResolver<'_> {
    fn resolve(&mut self, prompt: &Prompt<'_>) -> Resolution {
        if self.skip_all.contains(&prompt.category) && prompt.allows(&Resolution::Skip) {
            debug!(category = %prompt.category, path = prompt.path, "Skipped by earlier answer");
            return Resolution::Skip;
        }

        self.prompts += 1;
        let answer = self.inner.resolve(prompt);
        let answer = if prompt.allows(&answer) {
            answer
        } else if prompt.allows(&Resolution::Skip) {
            Resolution::Skip
        } else {
            Resolution::Abort
        };

        if answer == Resolution::SkipAll {
            self.skip_all.insert(prompt.category);
        }
        answer
    }

    fn report_fatal(&mut self, category: ErrorCategory, path: &str, err: &VfsError) {
        error!(category = %category, path, error = %err, "Job cannot continue");
        self.inner.report_fatal(category, path, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::{FixedResolver, IO_CHOICES, PROCEED_CHOICES};

    #[test]
    fn test_skip_all_is_remembered_per_category() {
        let mut inner = FixedResolver::new(Resolution::SkipAll);
        let mut sticky = StickyResolver::new(&mut inner);

        let read = Prompt::new(ErrorCategory::ReadFailure, "/a", IO_CHOICES);
        assert_eq!(sticky.resolve(&read), Resolution::SkipAll);
        assert_eq!(sticky.resolve(&read), Resolution::Skip);
        assert_eq!(sticky.prompts(), 1);

        let write = Prompt::new(ErrorCategory::WriteFailure, "/a", IO_CHOICES);
        assert_eq!(sticky.resolve(&write), Resolution::SkipAll);
        assert_eq!(sticky.prompts(), 2);
    }

    struct Always(Resolution);

    impl ErrorResolver for Always {
        fn resolve(&mut self, _prompt: &Prompt<'_>) -> Resolution {
            self.0.clone()
        }
    }

    #[test]
    fn test_disallowed_answer_falls_back() {
        let mut inner = Always(Resolution::Overwrite);
        let mut sticky = StickyResolver::new(&mut inner);

        let io = Prompt::new(ErrorCategory::ReadFailure, "/a", IO_CHOICES);
        assert_eq!(sticky.resolve(&io), Resolution::Skip);

        let abort_only = [ferry_core::Choice::Abort];
        let fatal = Prompt::new(ErrorCategory::InsufficientSpace, "/", &abort_only);
        assert_eq!(sticky.resolve(&fatal), Resolution::Abort);

        let proceed = Prompt::new(ErrorCategory::InsufficientSpace, "/", PROCEED_CHOICES);
        assert_eq!(sticky.resolve(&proceed), Resolution::Skip);
    }
}
