use kettle_cli::input::Input;
use kettle_cli::runner::Runner;
use std::io::Write;
use std::path::Path;

/// 60 targets and 60 decoys; 50 targets score well above every decoy
fn write_pin(path: &Path, offset: usize) -> anyhow::Result<()> {
    let mut file = std::fs::File::create(path)?;
    writeln!(file, "SpecId\tLabel\tScanNr\tscore\taux\tPeptide\tProteins")?;
    for i in 0..120 {
        let decoy = i >= 60;
        let score = if i < 50 {
            5.0 + (i % 10) as f64 / 10.0
        } else {
            (i % 10) as f64 / 10.0
        };
        writeln!(
            file,
            "{}_{}\t{}\t{}\t{}\t{}\tK.PEP{}.R\tP{}",
            offset,
            i,
            if decoy { -1 } else { 1 },
            i,
            score,
            (i * 7 % 13) as f64,
            i + offset,
            i
        )?;
    }
    Ok(())
}

fn input(paths: &[&Path], dest: &Path, extra: &str) -> anyhow::Result<Input> {
    let pin_paths = paths
        .iter()
        .map(|p| format!("{:?}", p.display().to_string()))
        .collect::<Vec<_>>()
        .join(", ");
    let json = format!(
        r#"{{ "pin_paths": [{}], "dest_dir": {:?}, "train_fdr": 0.05, "test_fdr": 0.05 {} }}"#,
        pin_paths,
        dest.display().to_string(),
        extra
    );
    Ok(serde_json::from_str(&json)?)
}

#[test]
fn single_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let pin = dir.path().join("run.pin");
    write_pin(&pin, 0)?;

    let dest = dir.path().join("out");
    let search = Runner::new(input(&[&pin], &dest, r#", "file_root": "test""#)?.build()?)?.run()?;

    let psms = dest.join("test.kettle.psms.txt");
    let peptides = dest.join("test.kettle.peptides.txt");
    let results = dest.join("test.results.json");
    assert!(psms.exists() && peptides.exists() && results.exists());
    assert_eq!(search.output_paths.len(), 3);

    let mut rdr = csv::ReaderBuilder::new().delimiter(b'\t').from_path(&psms)?;
    let rows = rdr.records().collect::<Result<Vec<_>, _>>()?;
    assert_eq!(rows.len(), 120);

    let passing = rows
        .iter()
        .filter(|r| &r[5] == "false" && r[8].parse::<f64>().unwrap() <= 0.05)
        .count();
    assert!(passing >= 45, "{} targets pass", passing);

    let json: serde_json::Value = serde_json::from_slice(&std::fs::read(&results)?)?;
    assert_eq!(json["brew"]["train_fdr"], 0.05);
    Ok(())
}

#[test]
fn per_file_with_workers() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let a = dir.path().join("a.pin");
    let b = dir.path().join("b.pin");
    write_pin(&a, 0)?;
    write_pin(&b, 1000)?;

    let dest = dir.path().join("out");
    let mut input = input(&[&a, &b], &dest, r#", "workers": 0"#)?;
    input.resolve_workers(2);
    let search = Runner::new(input.build()?)?.run()?;
    assert_eq!(search.workers, Some(2));

    for stem in ["a", "b"] {
        let path = dest.join(format!("{}.kettle.psms.txt", stem));
        let mut rdr = csv::ReaderBuilder::new().delimiter(b'\t').from_path(&path)?;
        assert_eq!(rdr.records().count(), 120);
        assert!(dest.join(format!("{}.kettle.peptides.txt", stem)).exists());
    }
    assert!(dest.join("results.json").exists());
    Ok(())
}

#[test]
fn aggregate_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let a = dir.path().join("a.pin");
    let b = dir.path().join("b.pin");
    write_pin(&a, 0)?;
    write_pin(&b, 1000)?;

    let dest = dir.path().join("out");
    Runner::new(input(&[&a, &b], &dest, r#", "aggregate": true"#)?.build()?)?.run()?;

    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(dest.join("kettle.psms.txt"))?;
    assert_eq!(rdr.records().count(), 240);
    Ok(())
}
