#[path = "../src/grading.rs"]
mod grading;
#[path = "../src/model.rs"]
mod model;
#[path = "../src/reconcile.rs"]
mod reconcile;

use grading::{validate_fractions, ChoiceMode, NoticeKind};
use model::{FormattedText, SubmittedAnswer};
use reconcile::reconcile;

fn submitted(texts: &[&str]) -> Vec<SubmittedAnswer> {
    texts
        .iter()
        .map(|t| SubmittedAnswer {
            answer: FormattedText::html(*t),
            fraction: 0.0,
            feedback: FormattedText::html(""),
        })
        .collect()
}

#[test]
fn every_existing_row_is_either_reused_or_deleted() {
    let shapes: [&[&str]; 5] = [
        &[],
        &["a"],
        &["a", "", "c"],
        &["a", "b", "c", "d", "e"],
        &[" ", "\t", "x"],
    ];
    for existing_len in 0..5i64 {
        let existing: Vec<i64> = (100..100 + existing_len).collect();
        for shape in shapes {
            let answers = submitted(shape);
            let plan = reconcile(&existing, &answers);
            let non_blank = shape.iter().filter(|t| !t.trim().is_empty()).count();

            assert_eq!(plan.updates.len() + plan.creates.len(), non_blank);
            let mut touched: Vec<i64> = plan.updates.iter().map(|u| u.id).collect();
            touched.extend(plan.deletions.iter().map(|d| d.id));
            touched.sort_unstable();
            assert_eq!(touched, existing, "shape {:?}", shape);

            // Reused ids keep ascending order, so the oldest rows survive.
            let reused: Vec<i64> = plan.updates.iter().map(|u| u.id).collect();
            assert_eq!(reused, existing[..reused.len()].to_vec());
            if !plan.creates.is_empty() {
                assert!(plan.deletions.is_empty());
            }
        }
    }
}

#[test]
fn validation_and_reconcile_agree_on_blank_answers() {
    let answers = submitted(&["a", "  ", "b"]);
    let pairs = [1.0, 0.0, 0.0];
    let res = validate_fractions(
        ChoiceMode::Single,
        answers
            .iter()
            .zip(pairs)
            .map(|(a, f)| (a.answer.text.as_str(), f)),
    );
    assert_eq!(res, Ok(()));
    assert_eq!(reconcile(&[], &answers).creates.len(), 2);

    let only_one = submitted(&["a", "  "]);
    let res = validate_fractions(
        ChoiceMode::Multi,
        only_one.iter().map(|a| (a.answer.text.as_str(), 1.0)),
    );
    assert_eq!(res.map_err(|n| n.kind), Err(NoticeKind::InsufficientAnswers));
}
