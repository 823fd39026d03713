use crate::db;
use crate::files::{self, FileArea};
use crate::model::{
    AnswerNumbering, ChoiceOptions, CombinedFeedback, ExtraFields, FormattedText, Hint,
    QuestionData, QuestionDefinition, SubmittedAnswer, TextFormat, QTYPE_NAME,
};
use anyhow::{anyhow, Context};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use rusqlite::Connection;
use tracing::warn;

/// Element tree; text and CDATA content is concatenated per element and kept
/// untrimmed, so container elements carry their indentation as text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlNode {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Trimmed text of a direct child, if present.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.trim())
    }

    /// Text of a direct child exactly as written.
    pub fn child_raw(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    fn find_first<'a>(&'a self, pred: &dyn Fn(&XmlNode) -> bool) -> Option<&'a XmlNode> {
        if pred(self) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find_first(pred))
    }
}

fn open_node(e: &BytesStart<'_>) -> anyhow::Result<XmlNode> {
    let mut node = XmlNode {
        name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
        ..XmlNode::default()
    };
    for a in e.attributes() {
        let a = a.context("malformed attribute")?;
        node.attrs.push((
            String::from_utf8_lossy(a.key.as_ref()).into_owned(),
            a.unescape_value()?.into_owned(),
        ));
    }
    Ok(node)
}

pub fn parse_tree(xml: &str) -> anyhow::Result<XmlNode> {
    let mut reader = Reader::from_str(xml);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;
    loop {
        match reader.read_event().context("xml parse error")? {
            Event::Start(e) => stack.push(open_node(&e)?),
            Event::Empty(e) => {
                let node = open_node(&e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            Event::End(_) => {
                let node = stack.pop().ok_or_else(|| anyhow!("unbalanced end tag"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            Event::Text(e) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&e.unescape()?);
                }
            }
            Event::CData(e) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    if !stack.is_empty() {
        return Err(anyhow!("unexpected end of document"));
    }
    root.ok_or_else(|| anyhow!("empty document"))
}

// ---- export ----

fn bool_str(v: bool) -> &'static str {
    if v {
        "true"
    } else {
        "false"
    }
}

/// Percent with at most five decimals, no trailing zeros.
fn percent_str(fraction: f64) -> String {
    let p = (fraction * 100.0 * 100_000.0).round() / 100_000.0;
    format!("{}", p)
}

fn write_text(out: &mut String, indent: &str, text: &str) {
    if text.contains(['<', '>', '&']) && !text.contains("]]>") {
        out.push_str(&format!("{}<text><![CDATA[{}]]></text>\n", indent, text));
    } else {
        out.push_str(&format!("{}<text>{}</text>\n", indent, escape(text)));
    }
}

fn write_files(
    conn: &Connection,
    out: &mut String,
    indent: &str,
    area: Option<FileArea<'_>>,
) -> anyhow::Result<()> {
    let Some(area) = area else {
        return Ok(());
    };
    for f in files::list_area_files(conn, &area)? {
        let content = files::read_area_file(conn, &area, &f.filename)?.unwrap_or_default();
        out.push_str(&format!(
            "{}<file name=\"{}\" path=\"/\" encoding=\"base64\">{}</file>\n",
            indent,
            escape(&f.filename),
            STANDARD.encode(content)
        ));
    }
    Ok(())
}

fn write_formatted(
    conn: &Connection,
    out: &mut String,
    indent: &str,
    tag: &str,
    t: &FormattedText,
    area: Option<FileArea<'_>>,
) -> anyhow::Result<()> {
    out.push_str(&format!("{}<{} format=\"{}\">\n", indent, tag, t.format.xml_name()));
    let inner = format!("{}  ", indent);
    write_text(out, &inner, &t.text);
    write_files(conn, out, &inner, area)?;
    out.push_str(&format!("{}</{}>\n", indent, tag));
    Ok(())
}

/// Serializes one stored question as a `<quiz>` document.
///
/// Field order after the headers: single, shuffleanswers, answernumbering,
/// extra fields, combined feedback, answers, hints.
pub fn export_question_xml(conn: &Connection, q: &QuestionData) -> anyhow::Result<String> {
    let h = &q.header;
    let ctx = h.context_id;
    let o = &q.options;
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<quiz>\n");
    out.push_str(&format!("<!-- question: {}  -->\n", h.id));
    out.push_str(&format!("  <question type=\"{}\">\n", QTYPE_NAME));
    out.push_str("    <name>\n");
    write_text(&mut out, "      ", &h.name);
    out.push_str("    </name>\n");
    write_formatted(
        conn,
        &mut out,
        "    ",
        "questiontext",
        &h.question_text,
        Some(FileArea::question(ctx, "questiontext", h.id)),
    )?;
    write_formatted(
        conn,
        &mut out,
        "    ",
        "generalfeedback",
        &h.general_feedback,
        Some(FileArea::question(ctx, "generalfeedback", h.id)),
    )?;
    out.push_str(&format!("    <defaultgrade>{:.7}</defaultgrade>\n", h.default_mark));
    out.push_str(&format!("    <penalty>{:.7}</penalty>\n", h.penalty));
    out.push_str("    <hidden>0</hidden>\n");

    out.push_str(&format!("    <single>{}</single>\n", bool_str(o.single)));
    out.push_str(&format!(
        "    <shuffleanswers>{}</shuffleanswers>\n",
        bool_str(o.shuffle_answers)
    ));
    out.push_str(&format!(
        "    <answernumbering>{}</answernumbering>\n",
        o.answer_numbering.as_str()
    ));
    for field in ExtraFields::NAMES {
        let value = o.extra.get(field).unwrap_or("");
        out.push_str(&format!("    <{0}>{1}</{0}>\n", field, escape(value)));
    }

    for area in CombinedFeedback::AREAS {
        if let Some(t) = o.feedback.field(area) {
            write_formatted(
                conn,
                &mut out,
                "    ",
                area,
                t,
                Some(FileArea::question(ctx, area, h.id)),
            )?;
        }
    }
    if o.feedback.show_num_correct {
        out.push_str("    <shownumcorrect/>\n");
    }

    for a in &q.answers {
        out.push_str(&format!(
            "    <answer fraction=\"{}\" format=\"{}\">\n",
            percent_str(a.fraction),
            a.answer.format.xml_name()
        ));
        write_text(&mut out, "      ", &a.answer.text);
        write_files(
            conn,
            &mut out,
            "      ",
            Some(FileArea::question(ctx, "answer", a.id)),
        )?;
        write_formatted(
            conn,
            &mut out,
            "      ",
            "feedback",
            &a.feedback,
            Some(FileArea::question(ctx, "answerfeedback", a.id)),
        )?;
        out.push_str("    </answer>\n");
    }

    // Hint files are keyed by hint row id, which the loaded data does not carry.
    let hint_ids: Vec<i64> = db::get_hints(conn, h.id)?.into_iter().map(|(id, _)| id).collect();
    for (i, hint) in q.hints.iter().enumerate() {
        out.push_str(&format!("    <hint format=\"{}\">\n", hint.hint.format.xml_name()));
        write_text(&mut out, "      ", &hint.hint.text);
        write_files(
            conn,
            &mut out,
            "      ",
            hint_ids.get(i).map(|&id| FileArea::question(ctx, "hint", id)),
        )?;
        if hint.show_num_correct {
            out.push_str("      <shownumcorrect/>\n");
        }
        if hint.clear_wrong {
            out.push_str("      <clearwrong/>\n");
        }
        out.push_str("    </hint>\n");
    }

    out.push_str("  </question>\n</quiz>\n");
    Ok(out)
}

// ---- import ----

fn parse_bool(s: &str) -> bool {
    matches!(s.trim(), "true" | "1")
}

fn format_attr(node: &XmlNode, default: TextFormat) -> TextFormat {
    node.attr("format")
        .and_then(TextFormat::from_xml_name)
        .unwrap_or(default)
}

/// Stages the `<file>` children of `node` in a fresh draft area and points
/// the text at it, so a later save migrates them like editor uploads.
fn stage_files(conn: &Connection, node: &XmlNode, text: String) -> anyhow::Result<String> {
    let mut shipped = node.children_named("file").peekable();
    if shipped.peek().is_none() {
        return Ok(text);
    }
    let draft = files::next_draft_item_id(conn)?;
    for f in shipped {
        let name = f
            .attr("name")
            .ok_or_else(|| anyhow!("<file> without a name"))?;
        let cleaned: String = f.text.chars().filter(|c| !c.is_whitespace()).collect();
        let content = STANDARD
            .decode(cleaned)
            .with_context(|| format!("file {} is not valid base64", name))?;
        files::add_area_file(conn, &FileArea::draft(draft), name, &content)?;
    }
    Ok(files::pluginfile_to_draft(&text, draft))
}

/// Text of an element shaped like `<x format=".."><text>..</text><file/>*</x>`.
fn formatted_child(
    conn: &Connection,
    parent: &XmlNode,
    tag: &str,
    default: TextFormat,
) -> anyhow::Result<FormattedText> {
    match parent.child(tag) {
        Some(node) => formatted_node(conn, node, default),
        None => Ok(FormattedText::new("", default)),
    }
}

fn formatted_node(conn: &Connection, node: &XmlNode, default: TextFormat) -> anyhow::Result<FormattedText> {
    let raw = node.child("text").map(|t| t.text.clone()).unwrap_or_default();
    let text = stage_files(conn, node, raw)?;
    Ok(FormattedText::new(text, format_attr(node, default)))
}

fn parse_f64(node: &XmlNode, tag: &str, default: f64) -> anyhow::Result<f64> {
    match node.child_text(tag) {
        Some(s) if !s.is_empty() => s
            .parse()
            .with_context(|| format!("<{}> is not a number: {}", tag, s)),
        _ => Ok(default),
    }
}

/// Reads the first non-category `<question>` of a document.
///
/// Returns `Ok(None)` when that question belongs to another type.
pub fn import_question_xml(conn: &Connection, xml: &str) -> anyhow::Result<Option<QuestionDefinition>> {
    let root = parse_tree(xml)?;
    let question = root
        .find_first(&|n: &XmlNode| n.name == "question" && n.attr("type") != Some("category"))
        .ok_or_else(|| anyhow!("no <question> element found"))?;
    if question.attr("type") != Some(QTYPE_NAME) {
        return Ok(None);
    }

    let name = question
        .child("name")
        .and_then(|n| n.child_text("text"))
        .unwrap_or("")
        .to_string();
    let question_text = formatted_child(conn, question, "questiontext", TextFormat::Html)?;
    let qfmt = question_text.format;
    let general_feedback = formatted_child(conn, question, "generalfeedback", qfmt)?;
    let default_mark = parse_f64(question, "defaultgrade", 1.0)?;
    let penalty = parse_f64(question, "penalty", 0.3333333)?;

    let single = parse_bool(question.child_text("single").unwrap_or("true"));
    let shuffle_answers = parse_bool(question.child_text("shuffleanswers").unwrap_or("false"));
    let numbering = question.child_text("answernumbering").unwrap_or("");
    // Some old exporters wrote an empty tag.
    let answer_numbering = match AnswerNumbering::parse(numbering) {
        Some(n) => n,
        None => {
            if !numbering.is_empty() {
                warn!(numbering, "unknown answer numbering, using abc");
            }
            AnswerNumbering::Abc
        }
    };

    let mut extra = ExtraFields::default();
    for field in ExtraFields::NAMES {
        extra.set(field, question.child_raw(field).unwrap_or("").to_string());
    }

    let mut feedback = CombinedFeedback {
        show_num_correct: question.child("shownumcorrect").is_some(),
        ..CombinedFeedback::default()
    };
    for area in CombinedFeedback::AREAS {
        let t = formatted_child(conn, question, area, qfmt)?;
        if let Some(field) = feedback.field_mut(area) {
            *field = t;
        }
    }

    let mut answers = Vec::new();
    for a in question.children_named("answer") {
        let percent: f64 = match a.attr("fraction") {
            Some(s) => s
                .trim()
                .parse()
                .with_context(|| format!("bad answer fraction: {}", s))?,
            None => 0.0,
        };
        answers.push(SubmittedAnswer {
            answer: formatted_node(conn, a, qfmt)?,
            fraction: percent / 100.0,
            feedback: formatted_child(conn, a, "feedback", qfmt)?,
        });
    }

    let mut hints = Vec::new();
    for h in question.children_named("hint") {
        hints.push(Hint {
            hint: formatted_node(conn, h, qfmt)?,
            show_num_correct: h.child("shownumcorrect").is_some(),
            clear_wrong: h.child("clearwrong").is_some(),
        });
    }

    Ok(Some(QuestionDefinition {
        name,
        question_text,
        general_feedback,
        default_mark,
        penalty,
        options: ChoiceOptions {
            single,
            shuffle_answers,
            answer_numbering,
            feedback,
            extra,
        },
        answers,
        hints,
    }))
}
