//! End-to-end properties of command sessions

#[path = "common/mod.rs"]
mod common;
use common::{fail, numeric, nums, run, session_with, Session, Variable};
use statash::parse_line;
use tempfile::TempDir;

fn sample() -> Session {
    session_with(vec![
        numeric("id", &[Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(5.0)]),
        numeric("x", &[Some(1.0), None, Some(3.0), Some(4.0), Some(5.0)]),
        numeric("y", &[Some(2.0), Some(1.0), Some(5.0), Some(4.0), Some(7.0)]),
        Variable::string("s", vec!["a".into(), "b".into(), "c".into(), "d".into(), "e".into()]),
    ])
}

#[test]
fn test_parse_is_stable_on_its_own_output() {
    let lines = [
        "bysort id: generate z = x + 1 if y > 2 in 1/3, replace",
        "quietly: regress y x [aw=w], vce(robust) level(90)",
        "eststo m1: summarize x y",
        "merge 1:1 id using \"other file.dta\", keep(match master) nogenerate",
        "capture drop if missing(x) | s == \"b\"",
    ];
    for text in lines {
        let first = parse_line(text).unwrap();
        let again = parse_line(&first.to_string()).unwrap();
        assert_eq!(first.to_string(), again.to_string(), "{}", text);
    }
}

#[test]
fn test_drop_if_removes_matches_and_keeps_order() {
    let mut s = sample();
    let before = run(&mut s, "count");
    assert_eq!(before.trim(), "5");
    let matched = run(&mut s, "count if y > 3");
    assert_eq!(matched.trim(), "3");
    run(&mut s, "drop if y > 3");
    assert_eq!(run(&mut s, "count").trim(), "2");
    assert_eq!(nums(&s, "id"), vec![Some(1.0), Some(2.0)]);
}

#[test]
fn test_generate_propagates_missing() {
    let mut s = sample();
    run(&mut s, "generate z = x + y");
    let z = nums(&s, "z");
    assert_eq!(z[1], None);
    assert_eq!(z[0], Some(3.0));
}

#[test]
fn test_summarize_ignores_missing() {
    let mut s = session_with(vec![numeric("x", &[Some(1.0), None, Some(3.0)])]);
    let out = run(&mut s, "summarize x");
    let row = out.lines().find(|l| l.trim_start().starts_with("x |")).unwrap();
    let fields: Vec<&str> = row.split_whitespace().collect();
    assert_eq!(fields[2], "2", "{}", out);
    assert_eq!(fields[3], "2", "{}", out);
}

#[test]
fn test_merge_on_disjoint_keys() {
    let dir = TempDir::new().unwrap();
    let using = dir.path().join("b.dta");
    let mut b = session_with(vec![
        numeric("id", &[Some(10.0), Some(11.0)]),
        numeric("w", &[Some(0.5), Some(0.25)]),
    ]);
    run(&mut b, &format!("save \"{}\"", using.display()));

    let mut s = sample();
    let report = run(&mut s, &format!("merge 1:1 id using \"{}\"", using.display()));
    assert!(report.contains("(_merge==2)"), "{}", report);
    assert_eq!(s.data().nobs(), 7);
    let merged = nums(&s, "_merge");
    let ids = nums(&s, "id");
    for (id, code) in ids.iter().zip(&merged) {
        let expected = if id.unwrap() >= 10.0 { 2.0 } else { 1.0 };
        assert_eq!(*code, Some(expected));
    }
}

#[test]
fn test_merge_requires_unique_keys() {
    let dir = TempDir::new().unwrap();
    let using = dir.path().join("b.dta");
    let mut b = session_with(vec![numeric("id", &[Some(1.0), Some(2.0)])]);
    run(&mut b, &format!("save \"{}\"", using.display()));

    let mut s = session_with(vec![numeric("id", &[Some(1.0), Some(1.0), Some(2.0)])]);
    let err = fail(&mut s, &format!("merge 1:1 id using \"{}\"", using.display()));
    assert_eq!(err.code, 459);
    assert_eq!(s.data().nobs(), 3);
    assert!(s.data().position("_merge").is_none());
}

#[test]
fn test_esttab_shows_added_statistics() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.rtf");
    let mut s = sample();
    run(&mut s, "eststo m1: regress y x");
    run(&mut s, "estadd local N2 99");
    run(&mut s, &format!("esttab using \"{}\"", path.display()));
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("N2"), "{}", text);
    assert!(text.contains("99"), "{}", text);
}

#[test]
fn test_esttab_csv_reads_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.csv");
    let mut s = sample();
    run(&mut s, "eststo m1: regress y x");
    run(&mut s, &format!("esttab using \"{}\", title(Wages)", path.display()));

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(&path)
        .unwrap();
    let records: Vec<Vec<String>> = reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect();

    assert_eq!(records[0], vec!["Wages"]);
    assert_eq!(records[1], vec!["", "(1)"]);
    assert_eq!(records[2], vec!["", "y"]);
    let coef = records.iter().find(|r| r[0] == "x").unwrap();
    assert_eq!(coef.len(), 2);
    assert!(!coef[1].is_empty());
    let n = records.iter().find(|r| r[0] == "N").unwrap();
    assert_eq!(n, &vec!["N".to_string(), "4".to_string()]);
    assert!(records.last().unwrap()[0].starts_with("* p<0.05"));
}

#[test]
fn test_save_and_use_reproduce_the_data() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("d.dta");
    let mut s = sample();
    run(&mut s, "label variable y \"Outcome\"");
    run(&mut s, "label define size 1 \"small\" 5 \"large\"");
    run(&mut s, "label values id size");
    let before = s.data().clone();
    run(&mut s, &format!("save \"{}\"", file.display()));
    run(&mut s, "clear");
    run(&mut s, &format!("use \"{}\"", file.display()));

    let after = s.data();
    assert_eq!(after.names().collect::<Vec<_>>(), before.names().collect::<Vec<_>>());
    for var in before.variables() {
        let loaded = after.require(&var.name).unwrap();
        assert_eq!(loaded.storage_type(), var.storage_type());
        assert_eq!(loaded.label, var.label);
        assert_eq!(loaded.value_label, var.value_label);
        for row in 0..before.nobs() {
            assert_eq!(after.value(&var.name, row).unwrap(), before.value(&var.name, row).unwrap());
        }
    }
    assert_eq!(run(&mut s, "label list size"), "size:\n           1 small\n           5 large");
}

#[test]
fn test_failed_commands_change_nothing() {
    let mut s = sample();
    run(&mut s, "quietly regress y x");
    let data = s.data().clone();
    let last = s.results().last().cloned();

    assert_eq!(fail(&mut s, "generate z = nosuch + 1").code, 111);
    assert_eq!(fail(&mut s, "replace x = s").code, 109);
    assert_eq!(fail(&mut s, "regress y nosuch").code, 111);
    assert_eq!(fail(&mut s, "frobnicate x").code, 199);

    assert_eq!(s.data(), &data);
    assert_eq!(s.results().last().cloned(), last);
}

#[test]
fn test_capture_hides_the_failure() {
    let mut s = sample();
    assert_eq!(run(&mut s, "capture generate z = nosuch"), "");
    assert!(s.data().position("z").is_none());
    assert_eq!(run(&mut s, "quietly generate z = 1"), "");
    assert_eq!(nums(&s, "z").len(), 5);
}

#[test]
fn test_do_file_stops_at_first_error() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("run.do");
    std::fs::write(
        &script,
        "* build some variables\ngenerate a = 1\ngenerate b = nosuch\ngenerate c = 3\n",
    )
    .unwrap();

    let mut s = sample();
    let err = fail(&mut s, &format!("do \"{}\"", script.display()));
    assert_eq!(err.code, 111);
    assert!(err.message.contains("line 3"), "{}", err.message);
    assert!(s.data().position("c").is_none());

    let mut s = sample();
    run(&mut s, &format!("do \"{}\", nostop", script.display()));
    assert!(s.data().position("c").is_some());
}
