use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_choicequizd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn choicequizd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

const MOODLE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MOODLE_BACKUP>
  <COURSE>
    <QUESTION_CATEGORIES>
      <QUESTION_CATEGORY>
        <ID>1</ID>
        <NAME>Default</NAME>
        <QUESTIONS>
          <QUESTION>
            <ID>101</ID>
            <NAME>Auto formatted</NAME>
            <QUESTIONTEXT>Which is blue?</QUESTIONTEXT>
            <QUESTIONTEXTFORMAT>0</QUESTIONTEXTFORMAT>
            <QTYPE>multichoice</QTYPE>
            <DEFAULTGRADE>1</DEFAULTGRADE>
            <PENALTY>0.1</PENALTY>
            <ANSWERS>
              <ANSWER><ID>1</ID><ANSWER_TEXT>sky</ANSWER_TEXT><FRACTION>1</FRACTION><FEEDBACK>yes</FEEDBACK></ANSWER>
              <ANSWER><ID>2</ID><ANSWER_TEXT>grass</ANSWER_TEXT><FRACTION>0</FRACTION><FEEDBACK>no</FEEDBACK></ANSWER>
            </ANSWERS>
            <MULTICHOICE>
              <LAYOUT>0</LAYOUT>
              <ANSWERS>1,2</ANSWERS>
              <SINGLE>1</SINGLE>
              <SHUFFLEANSWERS>0</SHUFFLEANSWERS>
              <CORRECTFEEDBACK>Well
done &lt;img src="$@FILEPHP@$$@SLASH@$pics$@SLASH@$star.png" /&gt;</CORRECTFEEDBACK>
              <PARTIALLYCORRECTFEEDBACK></PARTIALLYCORRECTFEEDBACK>
              <INCORRECTFEEDBACK>Try again</INCORRECTFEEDBACK>
              <ANSWERNUMBERING>ABCD</ANSWERNUMBERING>
            </MULTICHOICE>
          </QUESTION>
          <QUESTION>
            <ID>102</ID>
            <NAME>Already html</NAME>
            <QUESTIONTEXT>&lt;p&gt;Pick&lt;/p&gt;</QUESTIONTEXT>
            <QUESTIONTEXTFORMAT>1</QUESTIONTEXTFORMAT>
            <QTYPE>choicegnrquiz</QTYPE>
            <ANSWERS>
              <ANSWER><ID>3</ID><ANSWER_TEXT>a</ANSWER_TEXT><FRACTION>0.5</FRACTION><FEEDBACK></FEEDBACK></ANSWER>
              <ANSWER><ID>4</ID><ANSWER_TEXT>b</ANSWER_TEXT><FRACTION>0.5</FRACTION><FEEDBACK></FEEDBACK></ANSWER>
            </ANSWERS>
            <CHOICEGNRQUIZ>
              <SINGLE>0</SINGLE>
              <SHUFFLEANSWERS>1</SHUFFLEANSWERS>
              <CORRECTFEEDBACK>Line
kept</CORRECTFEEDBACK>
              <ANSWERNUMBERING>abc</ANSWERNUMBERING>
              <TIME>30</TIME>
              <DIFFICULTY>2</DIFFICULTY>
              <DISTINGUISHINGDEGREE>0.5</DISTINGUISHINGDEGREE>
            </CHOICEGNRQUIZ>
          </QUESTION>
          <QUESTION>
            <ID>103</ID>
            <NAME>Corrupt</NAME>
            <QUESTIONTEXT>No options block</QUESTIONTEXT>
            <QUESTIONTEXTFORMAT>1</QUESTIONTEXTFORMAT>
            <QTYPE>multichoice</QTYPE>
            <ANSWERS>
              <ANSWER><ID>5</ID><ANSWER_TEXT>x</ANSWER_TEXT><FRACTION>1</FRACTION><FEEDBACK></FEEDBACK></ANSWER>
              <ANSWER><ID>6</ID><ANSWER_TEXT>y</ANSWER_TEXT><FRACTION>0</FRACTION><FEEDBACK></FEEDBACK></ANSWER>
            </ANSWERS>
          </QUESTION>
          <QUESTION>
            <ID>104</ID>
            <NAME>Bad grades</NAME>
            <QUESTIONTEXT>Broken</QUESTIONTEXT>
            <QTYPE>multichoice</QTYPE>
            <ANSWERS>
              <ANSWER><ID>7</ID><ANSWER_TEXT>x</ANSWER_TEXT><FRACTION>0.5</FRACTION><FEEDBACK></FEEDBACK></ANSWER>
              <ANSWER><ID>8</ID><ANSWER_TEXT>y</ANSWER_TEXT><FRACTION>0</FRACTION><FEEDBACK></FEEDBACK></ANSWER>
            </ANSWERS>
            <MULTICHOICE><SINGLE>1</SINGLE><ANSWERNUMBERING>abc</ANSWERNUMBERING></MULTICHOICE>
          </QUESTION>
          <QUESTION>
            <ID>105</ID>
            <NAME>Essay</NAME>
            <QUESTIONTEXT>Discuss</QUESTIONTEXT>
            <QTYPE>essay</QTYPE>
          </QUESTION>
        </QUESTIONS>
      </QUESTION_CATEGORY>
    </QUESTION_CATEGORIES>
  </COURSE>
</MOODLE_BACKUP>
"#;

fn write_folder_backup(dir: &std::path::Path) {
    std::fs::write(dir.join("moodle.xml"), MOODLE_XML).expect("write moodle.xml");
    std::fs::create_dir_all(dir.join("course_files/pics")).expect("course files dir");
    std::fs::write(dir.join("course_files/pics/star.png"), b"star-bytes").expect("write star");
}

fn write_zip_backup(path: &std::path::Path) {
    use zip::write::FileOptions;
    let f = std::fs::File::create(path).expect("create zip");
    let mut zip = zip::ZipWriter::new(f);
    let opts = FileOptions::default();
    zip.start_file("moodle.xml", opts).expect("start moodle.xml");
    zip.write_all(MOODLE_XML.as_bytes()).expect("write moodle.xml");
    zip.start_file("course_files/pics/star.png", opts).expect("start star");
    zip.write_all(b"star-bytes").expect("write star");
    zip.finish().expect("finish zip");
}

fn question_id_for(summary: &serde_json::Value, legacy_id: i64) -> i64 {
    summary["imported"]
        .as_array()
        .expect("imported")
        .iter()
        .find(|q| q["legacyId"] == json!(legacy_id))
        .and_then(|q| q["questionId"].as_i64())
        .expect("imported question")
}

#[test]
fn folder_backup_imports_with_rich_editor_fixups() {
    let workspace = temp_dir("choicequiz-legacy-ws");
    let backup_dir = temp_dir("choicequiz-legacy-folder");
    write_folder_backup(&backup_dir);

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "questions.importLegacy",
        json!({ "contextId": 7, "backupPath": backup_dir.to_string_lossy() }),
    );
    assert_eq!(summary["imported"].as_array().map(|a| a.len()), Some(3));
    assert_eq!(summary["defaultedGroups"], json!(1));
    let skipped = summary["skipped"].as_array().expect("skipped");
    assert_eq!(skipped.len(), 2);
    assert!(skipped.iter().any(|s| s["legacyId"] == json!(104)));
    assert!(skipped.iter().any(|s| s["legacyId"] == json!(105)));

    let auto_id = question_id_for(&summary, 101);
    let opened = request_ok(&mut stdin, &mut reader, "3", "questions.open", json!({ "questionId": auto_id }));
    let fb = &opened["question"]["options"]["feedback"];
    assert_eq!(fb["correct"]["format"], json!("html"));
    assert_eq!(
        fb["correct"]["text"],
        json!("Well<br />\ndone <img src=\"@@PLUGINFILE@@/pics/star.png\" />")
    );
    assert_eq!(fb["incorrect"]["format"], json!("html"));
    assert_eq!(opened["question"]["options"]["answerNumbering"], json!("ABCD"));
    assert_eq!(opened["question"]["options"]["shuffleAnswers"], json!(false));

    let files = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "files.list",
        json!({ "contextId": 7, "component": "question", "filearea": "correctfeedback", "itemId": auto_id }),
    );
    assert_eq!(files["files"][0]["filename"], json!("pics/star.png"));

    let html_id = question_id_for(&summary, 102);
    let opened = request_ok(&mut stdin, &mut reader, "5", "questions.open", json!({ "questionId": html_id }));
    let options = &opened["question"]["options"];
    assert_eq!(options["feedback"]["correct"]["text"], json!("Line\nkept"));
    assert_eq!(options["feedback"]["correct"]["format"], json!("html"));
    assert_eq!(options["single"], json!(false));
    assert_eq!(options["extra"]["time"], json!("30"));

    let corrupt_id = question_id_for(&summary, 103);
    let opened = request_ok(&mut stdin, &mut reader, "6", "questions.open", json!({ "questionId": corrupt_id }));
    let options = &opened["question"]["options"];
    assert_eq!(options["single"], json!(true));
    assert_eq!(options["shuffleAnswers"], json!(true));
    assert_eq!(options["answerNumbering"], json!("abc"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(backup_dir);
}

#[test]
fn zipped_backup_with_textarea_keeps_old_formats() {
    let workspace = temp_dir("choicequiz-legacy-zip-ws");
    let out_dir = temp_dir("choicequiz-legacy-zip");
    let zip_path = out_dir.join("backup-moodle.zip");
    write_zip_backup(&zip_path);

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let defaults = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(defaults["import"]["textEditors"], json!("atto,tinymce,textarea"));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "import", "patch": { "textEditors": "textarea" } }),
    );

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "questions.importLegacy",
        json!({ "contextId": 8, "backupPath": zip_path.to_string_lossy() }),
    );
    let auto_id = question_id_for(&summary, 101);
    let opened = request_ok(&mut stdin, &mut reader, "5", "questions.open", json!({ "questionId": auto_id }));
    let fb = &opened["question"]["options"]["feedback"];
    assert_eq!(fb["correct"]["format"], json!("moodle"));
    assert_eq!(
        fb["correct"]["text"],
        json!("Well\ndone <img src=\"@@PLUGINFILE@@/pics/star.png\" />")
    );

    let missing = request(
        &mut stdin,
        &mut reader,
        "6",
        "questions.importLegacy",
        json!({ "contextId": 8, "backupPath": out_dir.join("nope.zip").to_string_lossy() }),
    );
    assert_eq!(missing["error"]["code"], json!("legacy_import_failed"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(out_dir);
}
