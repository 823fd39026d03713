use crate::db;
use crate::files::{self, FileArea};
use crate::grading::{self, ChoiceMode, ValidationNotice};
use crate::model::{
    Answer, ChoiceOptions, Hint, QuestionData, QuestionDefinition, SubmittedAnswer, QTYPE_NAME,
};
use crate::reconcile::{self, ANSWER_FILE_AREAS};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("question {0} not found")]
    QuestionNotFound(i64),
    #[error("question {0} has no options record")]
    OptionsMissing(i64),
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
    #[error(transparent)]
    Files(#[from] anyhow::Error),
}

impl SaveError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::QuestionNotFound(_) => "not_found",
            Self::OptionsMissing(_) => "options_missing",
            Self::Db(_) => "db_update_failed",
            Self::Files(_) => "files_failed",
        }
    }
}

/// Everything the editor submits for one save.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub question_id: i64,
    pub context_id: i64,
    pub options: ChoiceOptions,
    pub answers: Vec<SubmittedAnswer>,
    pub hints: Vec<Hint>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedIds {
    pub question_id: i64,
    pub options_id: i64,
    pub answer_ids: Vec<i64>,
    pub deleted_answer_ids: Vec<i64>,
    pub hint_ids: Vec<i64>,
}

#[derive(Debug, Clone)]
pub enum SaveOutcome {
    Saved(SavedIds),
    Rejected(ValidationNotice),
}

pub fn validate(req: &SaveRequest) -> Result<(), ValidationNotice> {
    grading::validate_fractions(
        ChoiceMode::from_single(req.options.single),
        req.answers
            .iter()
            .map(|a| (a.answer.text.as_str(), a.fraction)),
    )
}

/// Validates, then persists answers, options and hints as one transaction.
pub fn save_question_options(conn: &Connection, req: &SaveRequest) -> Result<SaveOutcome, SaveError> {
    if let Err(notice) = validate(req) {
        debug!(question_id = req.question_id, kind = ?notice.kind, "save rejected");
        return Ok(SaveOutcome::Rejected(notice));
    }

    let tx = conn.unchecked_transaction()?;
    match apply_save(&tx, req) {
        Ok(ids) => {
            tx.commit()?;
            Ok(SaveOutcome::Saved(ids))
        }
        Err(e) => {
            let _ = tx.rollback();
            Err(e)
        }
    }
}

/// Creates the bank row for `def` and saves its options, all or nothing.
pub fn create_question(
    conn: &Connection,
    context_id: i64,
    def: &QuestionDefinition,
) -> Result<SaveOutcome, SaveError> {
    let tx = conn.unchecked_transaction()?;
    match create_within(&tx, context_id, def) {
        Ok(SaveOutcome::Saved(ids)) => {
            tx.commit()?;
            info!(question_id = ids.question_id, "question created");
            Ok(SaveOutcome::Saved(ids))
        }
        Ok(rejected) => {
            let _ = tx.rollback();
            Ok(rejected)
        }
        Err(e) => {
            let _ = tx.rollback();
            Err(e)
        }
    }
}

/// Same as [`create_question`] inside a caller-held transaction.
pub fn create_within(
    tx: &Connection,
    context_id: i64,
    def: &QuestionDefinition,
) -> Result<SaveOutcome, SaveError> {
    let mut req = SaveRequest {
        question_id: 0,
        context_id,
        options: def.options.clone(),
        answers: def.answers.clone(),
        hints: def.hints.clone(),
    };
    if let Err(notice) = validate(&req) {
        return Ok(SaveOutcome::Rejected(notice));
    }

    let qid = db::insert_question(
        tx,
        &db::NewQuestion {
            context_id,
            qtype: QTYPE_NAME,
            name: &def.name,
            question_text: &def.question_text,
            general_feedback: &def.general_feedback,
            default_mark: def.default_mark,
            penalty: def.penalty,
        },
    )?;
    let question_text = files::migrate_embedded_files(
        tx,
        &FileArea::question(context_id, "questiontext", qid),
        &def.question_text.text,
    )?;
    let general_feedback = files::migrate_embedded_files(
        tx,
        &FileArea::question(context_id, "generalfeedback", qid),
        &def.general_feedback.text,
    )?;
    db::update_question_texts(tx, qid, &question_text, &general_feedback)?;

    req.question_id = qid;
    apply_save(tx, &req).map(SaveOutcome::Saved)
}

fn apply_save(conn: &Connection, req: &SaveRequest) -> Result<SavedIds, SaveError> {
    let qid = req.question_id;
    if db::get_question(conn, qid)?.is_none() {
        return Err(SaveError::QuestionNotFound(qid));
    }

    let existing = db::get_answers(conn, qid)?;
    let stored_files = StoredAnswerFiles::capture(conn, req.context_id, &existing)?;
    let existing_ids: Vec<i64> = existing.iter().map(|a| a.id).collect();
    let plan = reconcile::reconcile(&existing_ids, &req.answers);
    info!(
        question_id = qid,
        updates = plan.updates.len(),
        creates = plan.creates.len(),
        deletions = plan.deletions.len(),
        "saving answers"
    );
    if plan.is_noop() {
        debug!(question_id = qid, "no answers stored or submitted");
    }

    let mut answer_ids = Vec::with_capacity(plan.updates.len() + plan.creates.len());
    for u in &plan.updates {
        write_answer(conn, req.context_id, qid, u.id, u.submitted, &stored_files)?;
        answer_ids.push(u.id);
    }
    for s in &plan.creates {
        let id = db::insert_answer_placeholder(conn, qid)?;
        write_answer(conn, req.context_id, qid, id, s, &stored_files)?;
        answer_ids.push(id);
    }

    let mut deleted_answer_ids = Vec::with_capacity(plan.deletions.len());
    for d in &plan.deletions {
        for area in ANSWER_FILE_AREAS {
            files::delete_area_files(conn, &FileArea::question(req.context_id, area, d.id))?;
        }
        db::delete_answer(conn, d.id)?;
        deleted_answer_ids.push(d.id);
    }

    let options_id = db::ensure_options(conn, qid)?;
    let mut options = req.options.clone();
    for area in crate::model::CombinedFeedback::AREAS {
        if let Some(field) = options.feedback.field_mut(area) {
            field.text = files::migrate_embedded_files(
                conn,
                &FileArea::question(req.context_id, area, qid),
                &field.text,
            )?;
        }
    }
    db::update_options(conn, options_id, &options)?;

    let hint_ids = save_hints(conn, req.context_id, qid, &req.hints)?;

    Ok(SavedIds {
        question_id: qid,
        options_id,
        answer_ids,
        deleted_answer_ids,
        hint_ids,
    })
}

/// Files of one answer area as they were before the save, with the text
/// that referred to them.
struct StoredArea {
    answer_id: i64,
    filearea: &'static str,
    text: String,
    files: Vec<(String, Vec<u8>)>,
}

impl StoredArea {
    fn file(&self, filename: &str) -> Option<&[u8]> {
        self.files
            .iter()
            .find(|(name, _)| name == filename)
            .map(|(_, content)| content.as_slice())
    }
}

/// Snapshot of every stored answer's files. Reconciling can move a submission
/// onto another row; its `@@PLUGINFILE@@` references are resolved from here
/// before the row's area is pruned or the old row is deleted.
struct StoredAnswerFiles {
    areas: Vec<StoredArea>,
}

impl StoredAnswerFiles {
    fn capture(conn: &Connection, context_id: i64, existing: &[Answer]) -> anyhow::Result<Self> {
        let mut areas = Vec::new();
        for a in existing {
            for filearea in ANSWER_FILE_AREAS {
                let area = FileArea::question(context_id, filearea, a.id);
                let mut stored = Vec::new();
                for f in files::list_area_files(conn, &area)? {
                    if let Some(content) = files::read_area_file(conn, &area, &f.filename)? {
                        stored.push((f.filename, content));
                    }
                }
                if stored.is_empty() {
                    continue;
                }
                let text = if filearea == "answer" {
                    &a.answer.text
                } else {
                    &a.feedback.text
                };
                areas.push(StoredArea {
                    answer_id: a.id,
                    filearea,
                    text: text.clone(),
                    files: stored,
                });
            }
        }
        Ok(Self { areas })
    }

    /// Stored copy of `filename` for `text` landing in row `target_id`.
    /// A row whose stored text equals `text` wins, then the target row, then
    /// any other row in id order.
    fn find(&self, filearea: &str, target_id: i64, text: &str, filename: &str) -> Option<&[u8]> {
        self.areas
            .iter()
            .filter(|s| s.filearea == filearea)
            .filter_map(|s| {
                let rank = if s.text == text {
                    0
                } else if s.answer_id == target_id {
                    1
                } else {
                    2
                };
                s.file(filename).map(|content| (rank, content))
            })
            .min_by_key(|(rank, _)| *rank)
            .map(|(_, content)| content)
    }

    fn restore(&self, conn: &Connection, area: &FileArea<'_>, text: &str) -> anyhow::Result<()> {
        for filename in files::referenced_files(text) {
            if let Some(content) = self.find(area.filearea, area.item_id, text, &filename) {
                files::add_area_file(conn, area, &filename, content)?;
            }
        }
        Ok(())
    }
}

fn write_answer(
    conn: &Connection,
    context_id: i64,
    question_id: i64,
    id: i64,
    s: &SubmittedAnswer,
    stored_files: &StoredAnswerFiles,
) -> Result<(), SaveError> {
    let mut answer = Answer {
        id,
        question_id,
        answer: s.answer.clone(),
        fraction: s.fraction,
        feedback: s.feedback.clone(),
    };
    let answer_area = FileArea::question(context_id, "answer", id);
    stored_files.restore(conn, &answer_area, &s.answer.text)?;
    answer.answer.text = files::migrate_embedded_files(conn, &answer_area, &s.answer.text)?;
    let feedback_area = FileArea::question(context_id, "answerfeedback", id);
    stored_files.restore(conn, &feedback_area, &s.feedback.text)?;
    answer.feedback.text = files::migrate_embedded_files(conn, &feedback_area, &s.feedback.text)?;
    db::update_answer(conn, &answer)?;
    Ok(())
}

/// Upserts hints by position; surplus stored hints are removed with their files.
fn save_hints(
    conn: &Connection,
    context_id: i64,
    question_id: i64,
    hints: &[Hint],
) -> Result<Vec<i64>, SaveError> {
    let mut ids = Vec::new();
    for hint in hints.iter().filter(|h| !h.hint.is_blank()) {
        let ordinal = ids.len();
        let id = db::upsert_hint(conn, question_id, ordinal, hint)?;
        let text = files::migrate_embedded_files(
            conn,
            &FileArea::question(context_id, "hint", id),
            &hint.hint.text,
        )?;
        if text != hint.hint.text {
            db::update_hint_text(conn, id, &text)?;
        }
        ids.push(id);
    }
    for stale in db::hint_ids_from(conn, question_id, ids.len())? {
        files::delete_area_files(conn, &FileArea::question(context_id, "hint", stale))?;
        db::delete_hint(conn, stale)?;
    }
    Ok(ids)
}

pub fn load_question(conn: &Connection, question_id: i64) -> Result<QuestionData, SaveError> {
    let header = db::get_question(conn, question_id)?.ok_or(SaveError::QuestionNotFound(question_id))?;
    let (_, options) =
        db::get_options(conn, question_id)?.ok_or(SaveError::OptionsMissing(question_id))?;
    let answers = db::get_answers(conn, question_id)?;
    let hints = db::get_hints(conn, question_id)?
        .into_iter()
        .map(|(_, h)| h)
        .collect();
    Ok(QuestionData {
        header,
        options,
        answers,
        hints,
    })
}

pub fn random_guess_score(q: &QuestionData) -> Option<f64> {
    let fractions: Vec<f64> = q.answers.iter().map(|a| a.fraction).collect();
    grading::random_guess_score(ChoiceMode::from_single(q.options.single), &fractions)
}

/// Removes a question with its options, answers, hints and every owned file.
pub fn delete_question(conn: &Connection, question_id: i64) -> Result<(), SaveError> {
    let header = db::get_question(conn, question_id)?.ok_or(SaveError::QuestionNotFound(question_id))?;
    let ctx = header.context_id;

    let tx = conn.unchecked_transaction()?;
    let res = (|| -> Result<(), SaveError> {
        for a in db::get_answers(&tx, question_id)? {
            for area in ANSWER_FILE_AREAS {
                files::delete_area_files(&tx, &FileArea::question(ctx, area, a.id))?;
            }
            db::delete_answer(&tx, a.id)?;
        }
        for (hint_id, _) in db::get_hints(&tx, question_id)? {
            files::delete_area_files(&tx, &FileArea::question(ctx, "hint", hint_id))?;
            db::delete_hint(&tx, hint_id)?;
        }
        for area in crate::model::CombinedFeedback::AREAS
            .into_iter()
            .chain(["questiontext", "generalfeedback"])
        {
            files::delete_area_files(&tx, &FileArea::question(ctx, area, question_id))?;
        }
        db::delete_options(&tx, question_id)?;
        db::delete_question_row(&tx, question_id)?;
        Ok(())
    })();

    match res {
        Ok(()) => {
            tx.commit()?;
            info!(question_id, "question deleted");
            Ok(())
        }
        Err(e) => {
            let _ = tx.rollback();
            Err(e)
        }
    }
}
