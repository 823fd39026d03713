use anyhow::{anyhow, Context};
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::LazyLock;
use uuid::Uuid;

pub const DRAFTFILE: &str = "@@DRAFTFILE@@";
pub const PLUGINFILE: &str = "@@PLUGINFILE@@";

/// Drafts live outside any question context.
pub const DRAFT_CONTEXT_ID: i64 = 0;
const DRAFT_COMPONENT: &str = "user";
const DRAFT_AREA: &str = "draft";

static DRAFT_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@@DRAFTFILE@@/(\d+)/([^"'<>\s?#]+)"#).expect("draft ref pattern")
});
static PLUGIN_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"@@PLUGINFILE@@/([^"'<>\s?#]+)"#).expect("plugin ref pattern"));

/// One file area: files owned by `item_id` under `component`/`filearea`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileArea<'a> {
    pub context_id: i64,
    pub component: &'a str,
    pub filearea: &'a str,
    pub item_id: i64,
}

impl<'a> FileArea<'a> {
    pub fn question(context_id: i64, filearea: &'a str, item_id: i64) -> Self {
        Self {
            context_id,
            component: "question",
            filearea,
            item_id,
        }
    }

    pub fn draft(draft_item_id: i64) -> FileArea<'static> {
        FileArea {
            context_id: DRAFT_CONTEXT_ID,
            component: DRAFT_COMPONENT,
            filearea: DRAFT_AREA,
            item_id: draft_item_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub filename: String,
    pub contenthash: String,
    pub size: usize,
}

pub fn content_hash(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}

/// Writes (or replaces) a file in an area.
pub fn add_area_file(
    conn: &Connection,
    area: &FileArea<'_>,
    filename: &str,
    content: &[u8],
) -> anyhow::Result<()> {
    let filename = filename.trim().trim_start_matches('/');
    if filename.is_empty() {
        return Err(anyhow!("filename must not be empty"));
    }
    conn.execute(
        "INSERT INTO files(id, context_id, component, filearea, item_id, filename, contenthash, content)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(context_id, component, filearea, item_id, filename) DO UPDATE SET
           contenthash = excluded.contenthash,
           content = excluded.content",
        params![
            Uuid::new_v4().to_string(),
            area.context_id,
            area.component,
            area.filearea,
            area.item_id,
            filename,
            content_hash(content),
            content,
        ],
    )
    .with_context(|| format!("failed to store file {}", filename))?;
    Ok(())
}

pub fn read_area_file(
    conn: &Connection,
    area: &FileArea<'_>,
    filename: &str,
) -> anyhow::Result<Option<Vec<u8>>> {
    let content = conn
        .query_row(
            "SELECT content FROM files
             WHERE context_id = ? AND component = ? AND filearea = ? AND item_id = ? AND filename = ?",
            params![
                area.context_id,
                area.component,
                area.filearea,
                area.item_id,
                filename
            ],
            |r| r.get::<_, Vec<u8>>(0),
        )
        .optional()?;
    Ok(content)
}

pub fn list_area_files(conn: &Connection, area: &FileArea<'_>) -> anyhow::Result<Vec<StoredFile>> {
    let mut stmt = conn.prepare(
        "SELECT filename, contenthash, length(content) FROM files
         WHERE context_id = ? AND component = ? AND filearea = ? AND item_id = ?
         ORDER BY filename",
    )?;
    let rows = stmt
        .query_map(
            params![area.context_id, area.component, area.filearea, area.item_id],
            |r| {
                Ok(StoredFile {
                    filename: r.get(0)?,
                    contenthash: r.get(1)?,
                    size: r.get::<_, i64>(2)? as usize,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete_area_files(conn: &Connection, area: &FileArea<'_>) -> anyhow::Result<usize> {
    let n = conn.execute(
        "DELETE FROM files WHERE context_id = ? AND component = ? AND filearea = ? AND item_id = ?",
        params![area.context_id, area.component, area.filearea, area.item_id],
    )?;
    Ok(n)
}

/// Next unused draft item id.
pub fn next_draft_item_id(conn: &Connection) -> anyhow::Result<i64> {
    let max: i64 = conn.query_row(
        "SELECT COALESCE(MAX(item_id), 0) FROM files WHERE component = ? AND filearea = ?",
        params![DRAFT_COMPONENT, DRAFT_AREA],
        |r| r.get(0),
    )?;
    Ok(max + 1)
}

pub fn draft_url(draft_item_id: i64, filename: &str) -> String {
    format!("{}/{}/{}", DRAFTFILE, draft_item_id, filename)
}

/// Points every `@@PLUGINFILE@@/` reference at a draft area instead.
pub fn pluginfile_to_draft(text: &str, draft_item_id: i64) -> String {
    text.replace(
        &format!("{}/", PLUGINFILE),
        &format!("{}/{}/", DRAFTFILE, draft_item_id),
    )
}

/// Filenames an already migrated text refers to.
pub fn referenced_files(text: &str) -> HashSet<String> {
    PLUGIN_REF
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Moves drafts referenced by `text` into `area` and returns the rewritten text.
///
/// Afterwards the area holds exactly the files the text refers to: anything
/// left from an earlier save that is no longer referenced is removed.
pub fn migrate_embedded_files(
    conn: &Connection,
    area: &FileArea<'_>,
    text: &str,
) -> anyhow::Result<String> {
    let mut copied: Vec<(i64, String)> = Vec::new();
    for cap in DRAFT_REF.captures_iter(text) {
        let draft_id: i64 = cap[1]
            .parse()
            .with_context(|| format!("bad draft item id in {}", &cap[0]))?;
        let filename = cap[2].to_string();
        if copied.iter().any(|(d, f)| *d == draft_id && *f == filename) {
            continue;
        }
        let content = read_area_file(conn, &FileArea::draft(draft_id), &filename)?
            .ok_or_else(|| anyhow!("draft file not found: {}/{}", draft_id, filename))?;
        add_area_file(conn, area, &filename, &content)?;
        copied.push((draft_id, filename));
    }

    let rewritten = DRAFT_REF
        .replace_all(text, |c: &regex::Captures<'_>| format!("{}/{}", PLUGINFILE, &c[2]))
        .into_owned();

    let keep = referenced_files(&rewritten);
    for f in list_area_files(conn, area)? {
        if !keep.contains(&f.filename) {
            conn.execute(
                "DELETE FROM files
                 WHERE context_id = ? AND component = ? AND filearea = ? AND item_id = ? AND filename = ?",
                params![
                    area.context_id,
                    area.component,
                    area.filearea,
                    area.item_id,
                    f.filename
                ],
            )?;
        }
    }
    Ok(rewritten)
}
