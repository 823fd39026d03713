use crate::model::SubmittedAnswer;

/// File areas keyed by answer id that must be purged with the answer row.
pub const ANSWER_FILE_AREAS: [&str; 2] = ["answer", "answerfeedback"];

/// An existing answer row that takes over a submitted answer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnswerUpdate<'a> {
    pub id: i64,
    pub submitted: &'a SubmittedAnswer,
}

/// An existing answer row left over after all submissions were placed.
/// Its files under [`ANSWER_FILE_AREAS`] go before the row does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerDeletion {
    pub id: i64,
}

/// Minimal edit turning the stored answer set into the submitted one.
///
/// `updates` and `creates` together keep submission order: creates only
/// start once every existing row has been reused.
#[derive(Debug, Default, PartialEq)]
pub struct ReconcilePlan<'a> {
    pub updates: Vec<AnswerUpdate<'a>>,
    pub creates: Vec<&'a SubmittedAnswer>,
    pub deletions: Vec<AnswerDeletion>,
}

impl ReconcilePlan<'_> {
    pub fn is_noop(&self) -> bool {
        self.updates.is_empty() && self.creates.is_empty() && self.deletions.is_empty()
    }
}

/// Pairs submitted answers with existing ids in submission order.
///
/// `existing_ids` must be ascending. Identity is reused positionally, not by
/// content: the n-th non-blank submission takes the n-th oldest row. Blank
/// submissions consume nothing.
pub fn reconcile<'a>(existing_ids: &[i64], submitted: &'a [SubmittedAnswer]) -> ReconcilePlan<'a> {
    let mut plan = ReconcilePlan::default();
    let mut cursor = 0usize;

    for s in submitted {
        if s.answer.is_blank() {
            continue;
        }
        match existing_ids.get(cursor) {
            Some(&id) => {
                cursor += 1;
                plan.updates.push(AnswerUpdate { id, submitted: s });
            }
            None => plan.creates.push(s),
        }
    }

    plan.deletions = existing_ids[cursor..]
        .iter()
        .map(|&id| AnswerDeletion { id })
        .collect();
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FormattedText;

    fn sub(text: &str, fraction: f64) -> SubmittedAnswer {
        SubmittedAnswer {
            answer: FormattedText::html(text),
            fraction,
            feedback: FormattedText::html(""),
        }
    }

    #[test]
    fn identical_submission_only_updates() {
        let submitted = vec![sub("a", 1.0), sub("b", 0.0), sub("c", 0.0)];
        let plan = reconcile(&[10, 11, 12], &submitted);
        assert!(plan.creates.is_empty());
        assert!(plan.deletions.is_empty());
        let ids: Vec<i64> = plan.updates.iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![10, 11, 12]);
        assert_eq!(plan.updates[1].submitted, &submitted[1]);
    }

    #[test]
    fn one_fewer_deletes_last_unconsumed_row() {
        let submitted = vec![sub("a", 1.0), sub("b", 0.0)];
        let plan = reconcile(&[10, 11, 12], &submitted);
        assert_eq!(plan.updates.len(), 2);
        assert_eq!(plan.deletions, vec![AnswerDeletion { id: 12 }]);
    }

    #[test]
    fn extra_submissions_become_creates_in_order() {
        let submitted = vec![sub("a", 1.0), sub("b", 0.0), sub("c", 0.0)];
        let plan = reconcile(&[7], &submitted);
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.creates, vec![&submitted[1], &submitted[2]]);
        assert!(plan.deletions.is_empty());
    }

    #[test]
    fn blank_submissions_are_skipped_entirely() {
        let submitted = vec![sub("a", 1.0), sub("  ", 0.0), sub("c", 0.0)];
        let plan = reconcile(&[1, 2, 3], &submitted);
        assert_eq!(
            plan.updates.iter().map(|u| u.id).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(plan.updates[1].submitted.answer.text, "c");
        assert_eq!(plan.deletions, vec![AnswerDeletion { id: 3 }]);
    }

    #[test]
    fn empty_submission_deletes_everything() {
        let plan = reconcile(&[4, 5], &[]);
        assert!(plan.updates.is_empty());
        assert!(plan.creates.is_empty());
        assert_eq!(plan.deletions.len(), 2);
    }

    #[test]
    fn empty_store_creates_everything() {
        let submitted = vec![sub("a", 0.5), sub("b", 0.5)];
        let plan = reconcile(&[], &submitted);
        assert!(plan.updates.is_empty());
        assert_eq!(plan.creates.len(), 2);
        assert!(plan.deletions.is_empty());
        assert!(!plan.is_noop());
    }
}
