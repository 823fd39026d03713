use serde::{Deserialize, Serialize};

/// Question type tag used by the XML interchange format and legacy backups.
pub const QTYPE_NAME: &str = "choicegnrquiz";

/// Text formats, stored by their historical integer codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextFormat {
    /// Legacy "Moodle auto-format" (code 0).
    #[default]
    Moodle,
    Html,
    Plain,
    /// Deprecated "wiki-like" markup (code 3), still found in old backups.
    Wiki,
    Markdown,
}

impl TextFormat {
    pub fn code(self) -> i64 {
        match self {
            Self::Moodle => 0,
            Self::Html => 1,
            Self::Plain => 2,
            Self::Wiki => 3,
            Self::Markdown => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Moodle),
            1 => Some(Self::Html),
            2 => Some(Self::Plain),
            3 => Some(Self::Wiki),
            4 => Some(Self::Markdown),
            _ => None,
        }
    }

    pub fn xml_name(self) -> &'static str {
        match self {
            Self::Moodle => "moodle_auto_format",
            Self::Html => "html",
            Self::Plain => "plain_text",
            Self::Wiki => "wiki_like",
            Self::Markdown => "markdown",
        }
    }

    pub fn from_xml_name(name: &str) -> Option<Self> {
        match name.trim() {
            "moodle_auto_format" => Some(Self::Moodle),
            "html" => Some(Self::Html),
            "plain_text" => Some(Self::Plain),
            "wiki_like" => Some(Self::Wiki),
            "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FormattedText {
    pub text: String,
    #[serde(default)]
    pub format: TextFormat,
}

impl FormattedText {
    pub fn new(text: impl Into<String>, format: TextFormat) -> Self {
        Self {
            text: text.into(),
            format,
        }
    }

    pub fn html(text: impl Into<String>) -> Self {
        Self::new(text, TextFormat::Html)
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnswerNumbering {
    #[default]
    Abc,
    AbcUpper,
    Numeric,
    RomanLower,
    RomanUpper,
    None,
}

impl AnswerNumbering {
    pub const ALL: [AnswerNumbering; 6] = [
        Self::Abc,
        Self::AbcUpper,
        Self::Numeric,
        Self::RomanLower,
        Self::RomanUpper,
        Self::None,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "abc" => Some(Self::Abc),
            "ABCD" => Some(Self::AbcUpper),
            "123" => Some(Self::Numeric),
            "iii" => Some(Self::RomanLower),
            "IIII" => Some(Self::RomanUpper),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Abc => "abc",
            Self::AbcUpper => "ABCD",
            Self::Numeric => "123",
            Self::RomanLower => "iii",
            Self::RomanUpper => "IIII",
            Self::None => "none",
        }
    }
}

impl Serialize for AnswerNumbering {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AnswerNumbering {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown answer numbering: {}", s)))
    }
}

/// Opaque scalar fields carried alongside the options record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraFields {
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub difficulty: String,
    #[serde(default)]
    pub distinguishing_degree: String,
}

impl ExtraFields {
    /// Column / XML tag names in declaration order.
    pub const NAMES: [&'static str; 3] = ["time", "difficulty", "distinguishingdegree"];

    pub fn get(&self, name: &str) -> Option<&str> {
        match name {
            "time" => Some(&self.time),
            "difficulty" => Some(&self.difficulty),
            "distinguishingdegree" => Some(&self.distinguishing_degree),
            _ => None,
        }
    }

    pub fn set(&mut self, name: &str, value: String) {
        match name {
            "time" => self.time = value,
            "difficulty" => self.difficulty = value,
            "distinguishingdegree" => self.distinguishing_degree = value,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedFeedback {
    #[serde(default)]
    pub correct: FormattedText,
    #[serde(default)]
    pub partially_correct: FormattedText,
    #[serde(default)]
    pub incorrect: FormattedText,
    #[serde(default)]
    pub show_num_correct: bool,
}

impl CombinedFeedback {
    /// File areas of the three feedback texts, keyed by question id.
    pub const AREAS: [&'static str; 3] = [
        "correctfeedback",
        "partiallycorrectfeedback",
        "incorrectfeedback",
    ];

    pub fn field(&self, area: &str) -> Option<&FormattedText> {
        match area {
            "correctfeedback" => Some(&self.correct),
            "partiallycorrectfeedback" => Some(&self.partially_correct),
            "incorrectfeedback" => Some(&self.incorrect),
            _ => None,
        }
    }

    pub fn field_mut(&mut self, area: &str) -> Option<&mut FormattedText> {
        match area {
            "correctfeedback" => Some(&mut self.correct),
            "partiallycorrectfeedback" => Some(&mut self.partially_correct),
            "incorrectfeedback" => Some(&mut self.incorrect),
            _ => None,
        }
    }
}

/// The per-question options record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceOptions {
    pub single: bool,
    pub shuffle_answers: bool,
    pub answer_numbering: AnswerNumbering,
    #[serde(default)]
    pub feedback: CombinedFeedback,
    #[serde(default)]
    pub extra: ExtraFields,
}

impl Default for ChoiceOptions {
    fn default() -> Self {
        Self {
            single: true,
            shuffle_answers: true,
            answer_numbering: AnswerNumbering::Abc,
            feedback: CombinedFeedback::default(),
            extra: ExtraFields::default(),
        }
    }
}

/// A stored answer row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub id: i64,
    pub question_id: i64,
    pub answer: FormattedText,
    pub fraction: f64,
    pub feedback: FormattedText,
}

/// An answer as submitted by the editor: ordered, without identity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedAnswer {
    pub answer: FormattedText,
    pub fraction: f64,
    #[serde(default)]
    pub feedback: FormattedText,
}

impl From<&Answer> for SubmittedAnswer {
    fn from(a: &Answer) -> Self {
        Self {
            answer: a.answer.clone(),
            fraction: a.fraction,
            feedback: a.feedback.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub hint: FormattedText,
    #[serde(default)]
    pub show_num_correct: bool,
    #[serde(default)]
    pub clear_wrong: bool,
}

/// Bank-level fields of a question that this crate needs for export and delete.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionHeader {
    pub id: i64,
    pub context_id: i64,
    pub qtype: String,
    pub name: String,
    pub question_text: FormattedText,
    pub general_feedback: FormattedText,
    pub default_mark: f64,
    pub penalty: f64,
}

/// A fully loaded question.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionData {
    #[serde(flatten)]
    pub header: QuestionHeader,
    pub options: ChoiceOptions,
    pub answers: Vec<Answer>,
    pub hints: Vec<Hint>,
}

/// Canonical question content as produced by the XML codec, before it has an id.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionDefinition {
    pub name: String,
    pub question_text: FormattedText,
    pub general_feedback: FormattedText,
    pub default_mark: f64,
    pub penalty: f64,
    pub options: ChoiceOptions,
    pub answers: Vec<SubmittedAnswer>,
    pub hints: Vec<Hint>,
}
