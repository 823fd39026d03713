use crate::backup::LegacyBackup;
use crate::files::{self, FileArea, PLUGINFILE};
use crate::model::{
    AnswerNumbering, ChoiceOptions, CombinedFeedback, ExtraFields, FormattedText,
    QuestionDefinition, SubmittedAnswer, TextFormat, QTYPE_NAME,
};
use crate::sync::{self, SaveOutcome};
use crate::xml::{self, XmlNode};
use anyhow::Context;
use regex::Regex;
use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{info, warn};

/// Group tags a 1.9 backup may use for the options block.
const GROUP_TAGS: [&str; 2] = ["CHOICEGNRQUIZ", "MULTICHOICE"];
const ACCEPTED_QTYPES: [&str; 2] = [QTYPE_NAME, "multichoice"];

/// How the site edited text when the backup was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextProcessing {
    /// Plain textarea only; legacy text is kept verbatim.
    Trivial,
    RichEditor,
}

impl TextProcessing {
    /// Interprets the `textEditors` import setting. Only the exact value
    /// `textarea` selects trivial processing.
    pub fn from_text_editors(setting: &str) -> Self {
        if setting.trim() == "textarea" {
            Self::Trivial
        } else {
            Self::RichEditor
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyChoiceGroup {
    pub single: bool,
    pub shuffle_answers: bool,
    pub correct_feedback: String,
    pub partially_correct_feedback: String,
    pub incorrect_feedback: String,
    pub answer_numbering: String,
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyAnswer {
    pub id: i64,
    pub answer_text: String,
    pub fraction: f64,
    pub feedback: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyQuestion {
    pub id: i64,
    pub name: String,
    pub qtype: String,
    pub question_text: String,
    pub question_text_format: i64,
    pub general_feedback: String,
    pub default_grade: f64,
    pub penalty: f64,
    pub answers: Vec<LegacyAnswer>,
    /// Absent in corrupt backups.
    pub group: Option<LegacyChoiceGroup>,
}

static TAG_GAP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r">\s+<").expect("tag gap pattern"));
static NEWLINE_BEFORE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\n\r]<").expect("newline pattern"));
static NEWLINE_AFTER_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">[\n\r]").expect("newline pattern"));
static FILEPHP_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\$@FILEPHP@\$((?:\$@SLASH@\$|[^"'<>\s?#$])+)(?:\$@FORCEDOWNLOAD@\$)?"#)
        .expect("filephp pattern")
});

/// Auto-formats legacy plain text as HTML: whitespace between tags goes,
/// line breaks next to tags become spaces, remaining ones get `<br />`.
pub fn text_to_html(text: &str) -> String {
    let t = TAG_GAP.replace_all(text, "><");
    let t = NEWLINE_BEFORE_TAG.replace_all(&t, " <");
    let t = NEWLINE_AFTER_TAG.replace_all(&t, "> ");
    nl2br(&t)
}

fn nl2br(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\n' && c != '\r' {
            out.push(c);
            continue;
        }
        out.push_str("<br />");
        out.push(c);
        // \r\n and \n\r are one break.
        if let Some(&next) = chars.peek() {
            if (next == '\n' || next == '\r') && next != c {
                out.push(next);
                chars.next();
            }
        }
    }
    out
}

/// One-time format correction for text stored before formats were tracked
/// per field.
pub fn fix_legacy_text(text: &str, old_format: i64, processing: TextProcessing) -> FormattedText {
    if processing != TextProcessing::Trivial && old_format == TextFormat::Moodle.code() {
        FormattedText::html(text_to_html(text))
    } else {
        FormattedText::new(text, TextFormat::from_code(old_format).unwrap_or_default())
    }
}

fn default_group() -> LegacyChoiceGroup {
    LegacyChoiceGroup {
        single: true,
        shuffle_answers: true,
        answer_numbering: AnswerNumbering::Abc.as_str().to_string(),
        ..LegacyChoiceGroup::default()
    }
}

/// Converts the options block of one legacy question.
pub fn convert_choice_group(
    group: Option<&LegacyChoiceGroup>,
    old_format: i64,
    processing: TextProcessing,
) -> ChoiceOptions {
    let synthesized;
    let group = match group {
        Some(g) => g,
        None => {
            synthesized = default_group();
            &synthesized
        }
    };
    ChoiceOptions {
        single: group.single,
        shuffle_answers: group.shuffle_answers,
        answer_numbering: AnswerNumbering::parse(&group.answer_numbering).unwrap_or_default(),
        feedback: CombinedFeedback {
            correct: fix_legacy_text(&group.correct_feedback, old_format, processing),
            partially_correct: fix_legacy_text(
                &group.partially_correct_feedback,
                old_format,
                processing,
            ),
            incorrect: fix_legacy_text(&group.incorrect_feedback, old_format, processing),
            show_num_correct: false,
        },
        extra: group.extra.clone(),
    }
}

pub fn to_definition(q: &LegacyQuestion, processing: TextProcessing) -> QuestionDefinition {
    let fmt = q.question_text_format;
    let old = TextFormat::from_code(fmt).unwrap_or_default();
    QuestionDefinition {
        name: q.name.clone(),
        question_text: fix_legacy_text(&q.question_text, fmt, processing),
        general_feedback: fix_legacy_text(&q.general_feedback, fmt, processing),
        default_mark: q.default_grade,
        penalty: q.penalty,
        options: convert_choice_group(q.group.as_ref(), fmt, processing),
        answers: q
            .answers
            .iter()
            .map(|a| SubmittedAnswer {
                answer: FormattedText::new(a.answer_text.clone(), old),
                fraction: a.fraction,
                feedback: FormattedText::new(a.feedback.clone(), old),
            })
            .collect(),
        hints: Vec::new(),
    }
}

// ---- moodle.xml ----

fn text_of(node: &XmlNode, tag: &str) -> String {
    node.child_text(tag).unwrap_or("").to_string()
}

fn number_of<T: std::str::FromStr>(node: &XmlNode, tag: &str, default: T) -> T {
    node.child_text(tag)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn flag_of(node: &XmlNode, tag: &str, default: bool) -> bool {
    match node.child_text(tag) {
        Some("") | None => default,
        Some(s) => s != "0",
    }
}

fn parse_group(node: &XmlNode) -> LegacyChoiceGroup {
    let mut extra = ExtraFields::default();
    for field in ExtraFields::NAMES {
        extra.set(field, text_of(node, &field.to_ascii_uppercase()));
    }
    LegacyChoiceGroup {
        single: flag_of(node, "SINGLE", true),
        shuffle_answers: flag_of(node, "SHUFFLEANSWERS", true),
        correct_feedback: text_of(node, "CORRECTFEEDBACK"),
        partially_correct_feedback: text_of(node, "PARTIALLYCORRECTFEEDBACK"),
        incorrect_feedback: text_of(node, "INCORRECTFEEDBACK"),
        answer_numbering: text_of(node, "ANSWERNUMBERING"),
        extra,
    }
}

fn parse_question(node: &XmlNode) -> LegacyQuestion {
    let answers = node
        .child("ANSWERS")
        .map(|list| {
            list.children_named("ANSWER")
                .map(|a| LegacyAnswer {
                    id: number_of(a, "ID", 0),
                    answer_text: text_of(a, "ANSWER_TEXT"),
                    fraction: number_of(a, "FRACTION", 0.0),
                    feedback: text_of(a, "FEEDBACK"),
                })
                .collect()
        })
        .unwrap_or_default();

    // Grouped as a list in the backup, but never more than one in practice.
    let group = GROUP_TAGS
        .iter()
        .find_map(|tag| node.child(tag))
        .map(parse_group);

    LegacyQuestion {
        id: number_of(node, "ID", 0),
        name: text_of(node, "NAME"),
        qtype: text_of(node, "QTYPE").to_ascii_lowercase(),
        question_text: text_of(node, "QUESTIONTEXT"),
        question_text_format: number_of(node, "QUESTIONTEXTFORMAT", 0),
        general_feedback: text_of(node, "GENERALFEEDBACK"),
        default_grade: number_of(node, "DEFAULTGRADE", 1.0),
        penalty: number_of(node, "PENALTY", 0.1),
        answers,
        group,
    }
}

fn collect_questions<'a>(node: &'a XmlNode, out: &mut Vec<&'a XmlNode>) {
    if node.name == "QUESTION" {
        out.push(node);
        return;
    }
    for c in &node.children {
        collect_questions(c, out);
    }
}

/// Every `QUESTION` record in a backup's `moodle.xml`, whatever its type.
pub fn parse_moodle_xml(text: &str) -> anyhow::Result<Vec<LegacyQuestion>> {
    let root = xml::parse_tree(text).context("moodle.xml is not well-formed")?;
    let mut nodes = Vec::new();
    collect_questions(&root, &mut nodes);
    Ok(nodes.into_iter().map(parse_question).collect())
}

// ---- files ----

/// Copies course files behind `$@FILEPHP@$` links into a draft area and
/// points the links there, so the following save migrates them.
/// Links to files the backup lacks are rewritten but left dangling.
pub fn stage_legacy_links(
    conn: &Connection,
    backup: &mut LegacyBackup,
    draft: &mut Option<i64>,
    text: &str,
) -> anyhow::Result<String> {
    if !FILEPHP_LINK.is_match(text) {
        return Ok(text.to_string());
    }
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for cap in FILEPHP_LINK.captures_iter(text) {
        let m = cap.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
        out.push_str(&text[last..m.0]);
        last = m.1;

        let rel = cap[1].replace("$@SLASH@$", "/");
        let rel = rel.trim_start_matches('/');
        match backup.read_course_file(rel)? {
            Some(content) => {
                let id = match *draft {
                    Some(id) => id,
                    None => {
                        let id = files::next_draft_item_id(conn)?;
                        *draft = Some(id);
                        id
                    }
                };
                files::add_area_file(conn, &FileArea::draft(id), rel, &content)?;
                out.push_str(&files::draft_url(id, rel));
            }
            None => {
                warn!(path = rel, "course file missing from backup");
                out.push_str(&format!("{}/{}", PLUGINFILE, rel));
            }
        }
    }
    out.push_str(&text[last..]);
    Ok(out)
}

fn stage_definition(
    conn: &Connection,
    backup: &mut LegacyBackup,
    def: &mut QuestionDefinition,
) -> anyhow::Result<()> {
    let mut draft = None;
    for t in [&mut def.question_text, &mut def.general_feedback] {
        t.text = stage_legacy_links(conn, backup, &mut draft, &t.text)?;
    }
    for area in CombinedFeedback::AREAS {
        if let Some(t) = def.options.feedback.field_mut(area) {
            t.text = stage_legacy_links(conn, backup, &mut draft, &t.text)?;
        }
    }
    for a in &mut def.answers {
        a.answer.text = stage_legacy_links(conn, backup, &mut draft, &a.answer.text)?;
        a.feedback.text = stage_legacy_links(conn, backup, &mut draft, &a.feedback.text)?;
    }
    Ok(())
}

// ---- batch ----

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedQuestion {
    pub legacy_id: i64,
    pub question_id: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedQuestion {
    pub legacy_id: i64,
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyImportSummary {
    pub imported: Vec<ImportedQuestion>,
    pub skipped: Vec<SkippedQuestion>,
    pub defaulted_groups: usize,
}

/// Imports every choice question of a backup, one transaction per question.
/// A question that fails never stops the batch; it is reported as skipped.
pub fn import_backup(
    conn: &Connection,
    context_id: i64,
    backup_path: &Path,
    processing: TextProcessing,
) -> anyhow::Result<LegacyImportSummary> {
    let mut backup = LegacyBackup::open(backup_path)?;
    let questions = parse_moodle_xml(&backup.read_moodle_xml()?)?;
    let mut summary = LegacyImportSummary::default();

    for q in questions {
        let skip = |reason: String| SkippedQuestion {
            legacy_id: q.id,
            name: q.name.clone(),
            reason,
        };
        if !ACCEPTED_QTYPES.contains(&q.qtype.as_str()) {
            summary.skipped.push(skip(format!("unsupported qtype {}", q.qtype)));
            continue;
        }
        if q.group.is_none() {
            warn!(legacy_id = q.id, "options block missing, using defaults");
            summary.defaulted_groups += 1;
        }

        let mut def = to_definition(&q, processing);
        let tx = conn.unchecked_transaction()?;
        let res = stage_definition(&tx, &mut backup, &mut def)
            .map_err(sync::SaveError::from)
            .and_then(|_| sync::create_within(&tx, context_id, &def));
        match res {
            Ok(SaveOutcome::Saved(ids)) => {
                tx.commit()?;
                summary.imported.push(ImportedQuestion {
                    legacy_id: q.id,
                    question_id: ids.question_id,
                });
            }
            Ok(SaveOutcome::Rejected(notice)) => {
                let _ = tx.rollback();
                summary.skipped.push(skip(notice.to_string()));
            }
            Err(e) => {
                let _ = tx.rollback();
                warn!(legacy_id = q.id, error = %e, "legacy question failed");
                summary.skipped.push(skip(e.to_string()));
            }
        }
    }

    info!(
        imported = summary.imported.len(),
        skipped = summary.skipped.len(),
        "legacy import finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(feedback: &str) -> LegacyChoiceGroup {
        LegacyChoiceGroup {
            single: false,
            shuffle_answers: false,
            correct_feedback: feedback.to_string(),
            partially_correct_feedback: feedback.to_string(),
            incorrect_feedback: String::new(),
            answer_numbering: "123".to_string(),
            extra: ExtraFields::default(),
        }
    }

    #[test]
    fn text_to_html_collapses_and_breaks() {
        assert_eq!(text_to_html("<b>a</b>\n<i>b</i>"), "<b>a</b><i>b</i>");
        assert_eq!(text_to_html("line one\nline two"), "line one<br />\nline two");
        assert_eq!(text_to_html("a\r\nb"), "a<br />\r\nb");
        assert_eq!(text_to_html("x\n<b>y</b>"), "x <b>y</b>");
    }

    #[test]
    fn auto_format_text_becomes_html_with_rich_editor() {
        let o = convert_choice_group(Some(&group("Well\ndone")), 0, TextProcessing::RichEditor);
        assert_eq!(o.feedback.correct.format, TextFormat::Html);
        assert_eq!(o.feedback.correct.text, "Well<br />\ndone");
        assert_eq!(o.feedback.incorrect.format, TextFormat::Html);
        assert!(!o.single);
        assert_eq!(o.answer_numbering, AnswerNumbering::Numeric);
    }

    #[test]
    fn html_text_passes_through() {
        let o = convert_choice_group(Some(&group("Well\ndone")), 1, TextProcessing::RichEditor);
        assert_eq!(o.feedback.correct.format, TextFormat::Html);
        assert_eq!(o.feedback.correct.text, "Well\ndone");
    }

    #[test]
    fn trivial_processing_keeps_old_format() {
        let o = convert_choice_group(Some(&group("Well\ndone")), 0, TextProcessing::Trivial);
        assert_eq!(o.feedback.partially_correct.format, TextFormat::Moodle);
        assert_eq!(o.feedback.partially_correct.text, "Well\ndone");
    }

    #[test]
    fn wiki_format_is_kept_as_is() {
        let t = fix_legacy_text("x", 3, TextProcessing::Trivial);
        assert_eq!(t.format, TextFormat::Wiki);
        assert_eq!(t.format.code(), 3);
        let t = fix_legacy_text("x\ny", 3, TextProcessing::RichEditor);
        assert_eq!(t.format.code(), 3);
        assert_eq!(t.text, "x\ny");
    }

    #[test]
    fn missing_group_gets_defaults() {
        let o = convert_choice_group(None, 1, TextProcessing::RichEditor);
        assert!(o.single);
        assert!(o.shuffle_answers);
        assert_eq!(o.answer_numbering, AnswerNumbering::Abc);
        assert_eq!(o.feedback.correct.text, "");
        assert_eq!(o.feedback.correct.format, TextFormat::Html);
    }

    #[test]
    fn text_editors_setting_selects_processing() {
        assert_eq!(
            TextProcessing::from_text_editors("textarea"),
            TextProcessing::Trivial
        );
        assert_eq!(
            TextProcessing::from_text_editors("atto,tinymce,textarea"),
            TextProcessing::RichEditor
        );
    }

    #[test]
    fn moodle_xml_questions_are_parsed() {
        let text = r#"<MOODLE_BACKUP><COURSE><QUESTION_CATEGORIES><QUESTION_CATEGORY>
            <QUESTIONS>
              <QUESTION>
                <ID>7</ID><NAME>Colours</NAME><QUESTIONTEXT>Pick &lt;b&gt;red&lt;/b&gt;</QUESTIONTEXT>
                <QUESTIONTEXTFORMAT>0</QUESTIONTEXTFORMAT><QTYPE>multichoice</QTYPE>
                <DEFAULTGRADE>2</DEFAULTGRADE><PENALTY>0.1</PENALTY>
                <ANSWERS>
                  <ANSWER><ID>70</ID><ANSWER_TEXT>red</ANSWER_TEXT><FRACTION>1</FRACTION><FEEDBACK>yes</FEEDBACK></ANSWER>
                  <ANSWER><ID>71</ID><ANSWER_TEXT>blue</ANSWER_TEXT><FRACTION>0</FRACTION><FEEDBACK></FEEDBACK></ANSWER>
                </ANSWERS>
                <MULTICHOICE><LAYOUT>0</LAYOUT><ANSWERS>70,71</ANSWERS><SINGLE>1</SINGLE>
                  <SHUFFLEANSWERS>0</SHUFFLEANSWERS><CORRECTFEEDBACK>Good</CORRECTFEEDBACK>
                  <ANSWERNUMBERING>ABCD</ANSWERNUMBERING><DIFFICULTY>3</DIFFICULTY></MULTICHOICE>
              </QUESTION>
              <QUESTION><ID>8</ID><NAME>Essay</NAME><QTYPE>essay</QTYPE></QUESTION>
            </QUESTIONS>
        </QUESTION_CATEGORY></QUESTION_CATEGORIES></COURSE></MOODLE_BACKUP>"#;
        let qs = parse_moodle_xml(text).unwrap();
        assert_eq!(qs.len(), 2);
        let q = &qs[0];
        assert_eq!(q.id, 7);
        assert_eq!(q.question_text, "Pick <b>red</b>");
        assert_eq!(q.answers.len(), 2);
        assert_eq!(q.answers[0].fraction, 1.0);
        let g = q.group.as_ref().expect("group");
        assert!(g.single);
        assert!(!g.shuffle_answers);
        assert_eq!(g.extra.difficulty, "3");
        assert_eq!(qs[1].qtype, "essay");
        assert!(qs[1].group.is_none());
    }
}
