use crate::model::{
    Answer, AnswerNumbering, ChoiceOptions, CombinedFeedback, ExtraFields, FormattedText, Hint,
    QuestionHeader, TextFormat,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

pub const DB_FILE: &str = "choicequiz.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS questions(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            context_id INTEGER NOT NULL,
            qtype TEXT NOT NULL,
            name TEXT NOT NULL,
            questiontext TEXT NOT NULL,
            questiontextformat INTEGER NOT NULL DEFAULT 1,
            generalfeedback TEXT NOT NULL DEFAULT '',
            generalfeedbackformat INTEGER NOT NULL DEFAULT 1,
            defaultmark REAL NOT NULL DEFAULT 1,
            penalty REAL NOT NULL DEFAULT 0.3333333,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_questions_context ON questions(context_id)",
        [],
    )?;

    // AUTOINCREMENT keeps a deleted answer id from ever being handed out again.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS question_answers(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            question_id INTEGER NOT NULL,
            answer TEXT NOT NULL,
            answerformat INTEGER NOT NULL DEFAULT 0,
            fraction REAL NOT NULL DEFAULT 0,
            feedback TEXT NOT NULL,
            feedbackformat INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(question_id) REFERENCES questions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_question_answers_question ON question_answers(question_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS choice_options(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            question_id INTEGER NOT NULL UNIQUE,
            single INTEGER NOT NULL DEFAULT 1,
            shuffleanswers INTEGER NOT NULL DEFAULT 1,
            answernumbering TEXT NOT NULL DEFAULT 'abc',
            correctfeedback TEXT NOT NULL DEFAULT '',
            correctfeedbackformat INTEGER NOT NULL DEFAULT 0,
            partiallycorrectfeedback TEXT NOT NULL DEFAULT '',
            partiallycorrectfeedbackformat INTEGER NOT NULL DEFAULT 0,
            incorrectfeedback TEXT NOT NULL DEFAULT '',
            incorrectfeedbackformat INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(question_id) REFERENCES questions(id)
        )",
        [],
    )?;
    // Columns that arrived after the first schema; older workspaces get them here.
    ensure_choice_options_columns(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS question_hints(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            question_id INTEGER NOT NULL,
            ordinal INTEGER NOT NULL,
            hint TEXT NOT NULL,
            hintformat INTEGER NOT NULL DEFAULT 1,
            shownumcorrect INTEGER NOT NULL DEFAULT 0,
            clearwrong INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(question_id) REFERENCES questions(id),
            UNIQUE(question_id, ordinal)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS files(
            id TEXT PRIMARY KEY,
            context_id INTEGER NOT NULL,
            component TEXT NOT NULL,
            filearea TEXT NOT NULL,
            item_id INTEGER NOT NULL,
            filename TEXT NOT NULL,
            contenthash TEXT NOT NULL,
            content BLOB NOT NULL,
            UNIQUE(context_id, component, filearea, item_id, filename)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_files_area ON files(context_id, component, filearea, item_id)",
        [],
    )?;

    Ok(())
}

fn ensure_choice_options_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "choice_options", "shownumcorrect")? {
        conn.execute(
            "ALTER TABLE choice_options ADD COLUMN shownumcorrect INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    for column in ExtraFields::NAMES {
        if !table_has_column(conn, "choice_options", column)? {
            conn.execute(
                &format!(
                    "ALTER TABLE choice_options ADD COLUMN {} TEXT NOT NULL DEFAULT ''",
                    column
                ),
                [],
            )?;
        }
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn format_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<TextFormat> {
    let code: i64 = row.get(idx)?;
    Ok(TextFormat::from_code(code).unwrap_or_default())
}

// ---- settings ----

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        params![key, serde_json::to_string(value)?],
    )?;
    Ok(())
}

// ---- questions ----

pub struct NewQuestion<'a> {
    pub context_id: i64,
    pub qtype: &'a str,
    pub name: &'a str,
    pub question_text: &'a FormattedText,
    pub general_feedback: &'a FormattedText,
    pub default_mark: f64,
    pub penalty: f64,
}

pub fn insert_question(conn: &Connection, q: &NewQuestion<'_>) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO questions(context_id, qtype, name, questiontext, questiontextformat,
                               generalfeedback, generalfeedbackformat, defaultmark, penalty, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            q.context_id,
            q.qtype,
            q.name,
            q.question_text.text,
            q.question_text.format.code(),
            q.general_feedback.text,
            q.general_feedback.format.code(),
            q.default_mark,
            q.penalty,
            now_ts(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_question_texts(
    conn: &Connection,
    question_id: i64,
    question_text: &str,
    general_feedback: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE questions SET questiontext = ?, generalfeedback = ?, updated_at = ? WHERE id = ?",
        params![question_text, general_feedback, now_ts(), question_id],
    )?;
    Ok(())
}

pub fn get_question(conn: &Connection, question_id: i64) -> rusqlite::Result<Option<QuestionHeader>> {
    conn.query_row(
        "SELECT id, context_id, qtype, name, questiontext, questiontextformat,
                generalfeedback, generalfeedbackformat, defaultmark, penalty
         FROM questions WHERE id = ?",
        [question_id],
        |r| {
            Ok(QuestionHeader {
                id: r.get(0)?,
                context_id: r.get(1)?,
                qtype: r.get(2)?,
                name: r.get(3)?,
                question_text: FormattedText::new(r.get::<_, String>(4)?, format_at(r, 5)?),
                general_feedback: FormattedText::new(r.get::<_, String>(6)?, format_at(r, 7)?),
                default_mark: r.get(8)?,
                penalty: r.get(9)?,
            })
        },
    )
    .optional()
}

pub fn delete_question_row(conn: &Connection, question_id: i64) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM questions WHERE id = ?", [question_id])
}

// ---- answers ----

pub fn get_answers(conn: &Connection, question_id: i64) -> rusqlite::Result<Vec<Answer>> {
    let mut stmt = conn.prepare(
        "SELECT id, question_id, answer, answerformat, fraction, feedback, feedbackformat
         FROM question_answers WHERE question_id = ? ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([question_id], |r| {
        Ok(Answer {
            id: r.get(0)?,
            question_id: r.get(1)?,
            answer: FormattedText::new(r.get::<_, String>(2)?, format_at(r, 3)?),
            fraction: r.get(4)?,
            feedback: FormattedText::new(r.get::<_, String>(5)?, format_at(r, 6)?),
        })
    })?;
    rows.collect()
}

/// Inserts an empty placeholder row so file areas can be keyed by its id.
pub fn insert_answer_placeholder(conn: &Connection, question_id: i64) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO question_answers(question_id, answer, feedback) VALUES(?, '', '')",
        [question_id],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_answer(conn: &Connection, answer: &Answer) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE question_answers
         SET answer = ?, answerformat = ?, fraction = ?, feedback = ?, feedbackformat = ?
         WHERE id = ? AND question_id = ?",
        params![
            answer.answer.text,
            answer.answer.format.code(),
            answer.fraction,
            answer.feedback.text,
            answer.feedback.format.code(),
            answer.id,
            answer.question_id,
        ],
    )
}

pub fn delete_answer(conn: &Connection, answer_id: i64) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM question_answers WHERE id = ?", [answer_id])
}

// ---- options ----

pub fn get_options(conn: &Connection, question_id: i64) -> rusqlite::Result<Option<(i64, ChoiceOptions)>> {
    conn.query_row(
        "SELECT id, single, shuffleanswers, answernumbering,
                correctfeedback, correctfeedbackformat,
                partiallycorrectfeedback, partiallycorrectfeedbackformat,
                incorrectfeedback, incorrectfeedbackformat,
                shownumcorrect, time, difficulty, distinguishingdegree
         FROM choice_options WHERE question_id = ?",
        [question_id],
        |r| {
            let numbering: String = r.get(3)?;
            Ok((
                r.get(0)?,
                ChoiceOptions {
                    single: r.get::<_, i64>(1)? != 0,
                    shuffle_answers: r.get::<_, i64>(2)? != 0,
                    answer_numbering: AnswerNumbering::parse(&numbering).unwrap_or_default(),
                    feedback: CombinedFeedback {
                        correct: FormattedText::new(r.get::<_, String>(4)?, format_at(r, 5)?),
                        partially_correct: FormattedText::new(
                            r.get::<_, String>(6)?,
                            format_at(r, 7)?,
                        ),
                        incorrect: FormattedText::new(r.get::<_, String>(8)?, format_at(r, 9)?),
                        show_num_correct: r.get::<_, i64>(10)? != 0,
                    },
                    extra: ExtraFields {
                        time: r.get(11)?,
                        difficulty: r.get(12)?,
                        distinguishing_degree: r.get(13)?,
                    },
                },
            ))
        },
    )
    .optional()
}

/// Creates the options row with empty feedback if the question has none yet.
pub fn ensure_options(conn: &Connection, question_id: i64) -> rusqlite::Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM choice_options WHERE question_id = ?",
            [question_id],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO choice_options(question_id, correctfeedback, partiallycorrectfeedback, incorrectfeedback)
         VALUES(?, '', '', '')",
        [question_id],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_options(conn: &Connection, options_id: i64, o: &ChoiceOptions) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE choice_options SET
           single = ?, shuffleanswers = ?, answernumbering = ?,
           correctfeedback = ?, correctfeedbackformat = ?,
           partiallycorrectfeedback = ?, partiallycorrectfeedbackformat = ?,
           incorrectfeedback = ?, incorrectfeedbackformat = ?,
           shownumcorrect = ?, time = ?, difficulty = ?, distinguishingdegree = ?,
           updated_at = ?
         WHERE id = ?",
        params![
            o.single as i64,
            o.shuffle_answers as i64,
            o.answer_numbering.as_str(),
            o.feedback.correct.text,
            o.feedback.correct.format.code(),
            o.feedback.partially_correct.text,
            o.feedback.partially_correct.format.code(),
            o.feedback.incorrect.text,
            o.feedback.incorrect.format.code(),
            o.feedback.show_num_correct as i64,
            o.extra.time,
            o.extra.difficulty,
            o.extra.distinguishing_degree,
            now_ts(),
            options_id,
        ],
    )
}

pub fn delete_options(conn: &Connection, question_id: i64) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM choice_options WHERE question_id = ?", [question_id])
}

// ---- hints ----

pub fn get_hints(conn: &Connection, question_id: i64) -> rusqlite::Result<Vec<(i64, Hint)>> {
    let mut stmt = conn.prepare(
        "SELECT id, hint, hintformat, shownumcorrect, clearwrong
         FROM question_hints WHERE question_id = ? ORDER BY ordinal",
    )?;
    let rows = stmt.query_map([question_id], |r| {
        Ok((
            r.get(0)?,
            Hint {
                hint: FormattedText::new(r.get::<_, String>(1)?, format_at(r, 2)?),
                show_num_correct: r.get::<_, i64>(3)? != 0,
                clear_wrong: r.get::<_, i64>(4)? != 0,
            },
        ))
    })?;
    rows.collect()
}

/// Upserts the hint at `ordinal`, returning its row id.
pub fn upsert_hint(
    conn: &Connection,
    question_id: i64,
    ordinal: usize,
    hint: &Hint,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO question_hints(question_id, ordinal, hint, hintformat, shownumcorrect, clearwrong)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(question_id, ordinal) DO UPDATE SET
           hint = excluded.hint,
           hintformat = excluded.hintformat,
           shownumcorrect = excluded.shownumcorrect,
           clearwrong = excluded.clearwrong",
        params![
            question_id,
            ordinal as i64,
            hint.hint.text,
            hint.hint.format.code(),
            hint.show_num_correct as i64,
            hint.clear_wrong as i64,
        ],
    )?;
    conn.query_row(
        "SELECT id FROM question_hints WHERE question_id = ? AND ordinal = ?",
        params![question_id, ordinal as i64],
        |r| r.get(0),
    )
}

pub fn update_hint_text(conn: &Connection, hint_id: i64, text: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE question_hints SET hint = ? WHERE id = ?",
        params![text, hint_id],
    )
}

/// Ids of hints at or beyond `ordinal`.
pub fn hint_ids_from(conn: &Connection, question_id: i64, ordinal: usize) -> rusqlite::Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM question_hints WHERE question_id = ? AND ordinal >= ? ORDER BY ordinal",
    )?;
    let rows = stmt.query_map(params![question_id, ordinal as i64], |r| r.get(0))?;
    rows.collect()
}

pub fn delete_hint(conn: &Connection, hint_id: i64) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM question_hints WHERE id = ?", [hint_id])
}
