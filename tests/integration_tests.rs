use chrono::NaiveDate;
use hospital_analytics::analyzers::{Aggregates, high_risk_patients};
use hospital_analytics::charts::GENDER_PIE;
use hospital_analytics::error::AnalysisError;
use hospital_analytics::parser::{parse_hospitals, parse_patients, parse_treatments};
use hospital_analytics::pipeline::clean::clean;
use hospital_analytics::pipeline::enrich::{default_reference_date, enrich, enrich_row};
use hospital_analytics::pipeline::merge::{TreatmentJoin, merge};
use hospital_analytics::records::{AgeGroup, UnifiedRow};
use hospital_analytics::report::{
    AVG_STAY_BY_CONDITION, DATA_QUALITY, FULL_TABLE, ReportConfig, SUMMARY_JSON, Sources, analyze,
    run_report, validate,
};
use std::io::Read;
use std::path::PathBuf;

fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"))
}

fn output_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("hospital_analytics_it_{name}"));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn config(name: &str) -> ReportConfig {
    ReportConfig {
        patients: fixture("patients.csv"),
        hospitals: fixture("hospitals.csv"),
        treatments: fixture("treatments.csv"),
        output_dir: output_dir(name),
        ..ReportConfig::default()
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn test_single_patient_end_to_end() {
    let patients = parse_patients(
        "patients",
        b"Patient_ID,DOB,Admission_Date,Discharge_Date,Gender,Condition,Hospital_ID,Readmitted,Outcome\n\
          P1,2000-01-01,2024-01-05,2024-01-10,F,Flu,H1,1,Improved\n",
    )
    .expect("Failed to parse patients");
    let hospitals = parse_hospitals("hospitals", b"Hospital_ID,Department\nH1,General\n")
        .expect("Failed to parse hospitals");
    let treatments = parse_treatments(
        "treatments",
        b"Condition,Treatment_Type,Effectiveness_Rate\nFlu,Antiviral,0.8\n",
    )
    .expect("Failed to parse treatments");

    let (merged, _) = merge(&patients.rows, &hospitals, &treatments, TreatmentJoin::FanOut);
    let (cleaned, _) = clean(merged);
    let (table, anomalies) = enrich(cleaned, default_reference_date());
    let aggregates = Aggregates::from_rows(&table.rows).expect("Failed to aggregate");

    assert!(anomalies.is_empty());
    let row = &table.rows[0];
    assert_eq!(row.age, Some(24));
    // 24 falls in the (18, 35] bin.
    assert_eq!(row.age_group, Some(AgeGroup::YoungAdult));
    assert_eq!(row.length_of_stay, Some(5));
    assert_eq!(row.row.department.as_deref(), Some("General"));
    assert!(close(aggregates.readmission_rate, 1.0));
    assert!(close(aggregates.avg_stay_by_condition["Flu"], 5.0));
    assert!(close(aggregates.effectiveness_summary["Antiviral"], 0.8));
}

#[test]
fn test_fixture_pipeline_fans_out_and_flags() {
    let cfg = config("analyze");
    let sources =
        Sources::load(&cfg.patients, &cfg.hospitals, &cfg.treatments).expect("Failed to load");

    // P6 has an unparseable admission date.
    assert_eq!(sources.patients.rows.len(), 6);
    let errors = sources.row_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].column, "admission_date");
    assert_eq!(sources.hospitals.extra_columns, vec!["Region".to_string()]);

    let analysis =
        analyze(&sources, cfg.reference_date, TreatmentJoin::FanOut).expect("Failed to analyze");

    // Heart Disease has two treatments, so P2 and P7 appear twice.
    assert_eq!(analysis.merge.merged_rows, 8);
    assert_eq!(analysis.merge.fanned_out_patients, 2);
    assert_eq!(analysis.merge.unmatched_hospital, 1);

    let a = &analysis.aggregates;
    assert_eq!(a.total_rows, 8);
    assert!(close(a.readmission_rate, 5.0 / 8.0));
    assert!(close(a.readmission_by_condition["Diabetes"], 1.0));
    assert!(close(a.avg_stay_by_condition["Flu"], 3.5));
    assert!(close(a.avg_stay_by_condition["Heart Disease"], 10.0));
    // The inverted P5 stay is left out of the mean.
    assert!(close(a.avg_stay_by_condition["Diabetes"], 3.0));
    assert!(close(a.effectiveness_summary["Insulin"], 0.85));
    assert_eq!(a.high_risk_count, 3);
    assert_eq!(high_risk_patients(&analysis.table.rows).len(), 3);
    assert_eq!(a.age_group_distribution[&AgeGroup::Senior], 2);
    assert_eq!(a.age_group_distribution[&AgeGroup::Child], 1);

    assert_eq!(analysis.anomalies.len(), 1);
    assert_eq!(analysis.anomalies[0].patient_id.as_deref(), Some("P5"));
    assert_eq!(analysis.anomalies[0].length_of_stay, -3);

    let top = a.top_readmission_conditions(2);
    assert_eq!(top[0].condition, "Diabetes");
    assert_eq!(top[1].condition, "Flu");
}

#[test]
fn test_first_match_join_keeps_one_row_per_patient() {
    let cfg = config("first_match");
    let sources =
        Sources::load(&cfg.patients, &cfg.hospitals, &cfg.treatments).expect("Failed to load");
    let analysis = analyze(&sources, cfg.reference_date, TreatmentJoin::FirstMatch)
        .expect("Failed to analyze");

    assert_eq!(analysis.merge.merged_rows, 6);
    assert_eq!(analysis.merge.fanned_out_patients, 0);
    assert!(!analysis
        .aggregates
        .effectiveness_summary
        .contains_key("Medication"));
}

#[test]
fn test_run_report_writes_every_artifact() {
    let cfg = config("report");
    let outcome = run_report(&cfg).expect("Report failed");

    for name in [
        FULL_TABLE,
        AVG_STAY_BY_CONDITION,
        DATA_QUALITY,
        SUMMARY_JSON,
        GENDER_PIE,
    ] {
        assert!(cfg.output_dir.join(name).exists(), "{name} missing");
    }
    assert_eq!(outcome.written.len(), 10);
    assert_eq!(outcome.row_errors.len(), 1);

    let summary: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(cfg.output_dir.join(SUMMARY_JSON)).expect("summary missing"),
    )
    .expect("summary is not JSON");
    assert_eq!(summary["schema_version"], 1);
    assert_eq!(summary["treatment_join"], "fan-out");
    assert_eq!(summary["rejected_rows"], 1);
    assert_eq!(summary["merge"]["merged_rows"], 8);

    let quality =
        std::fs::read_to_string(cfg.output_dir.join(DATA_QUALITY)).expect("quality missing");
    assert!(quality.contains("not-a-date"));
    assert!(quality.contains("negative_stay,patients,6,Length_of_Stay,-3,"));
}

#[test]
fn test_exported_table_reloads_with_same_derived_columns() {
    let cfg = config("reload");
    run_report(&cfg).expect("Report failed");
    let bytes = std::fs::read(cfg.output_dir.join(FULL_TABLE)).expect("export missing");

    let reloaded = parse_patients("export", &bytes).expect("Failed to reload export");
    assert!(reloaded.errors.is_empty());
    assert_eq!(reloaded.rows.len(), 8);

    let mut reader = csv::Reader::from_reader(bytes.as_slice());
    let headers = reader.headers().expect("no header").clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .unwrap_or_else(|| panic!("{name} not exported"))
    };
    let (age, group, stay) = (column("Age"), column("Age_Group"), column("Length_of_Stay"));
    assert!(headers.iter().any(|h| h == "Region"));

    for (record, patient) in reader.records().zip(reloaded.rows) {
        let record = record.expect("bad record");
        let derived = enrich_row(
            UnifiedRow {
                patient,
                ..Default::default()
            },
            cfg.reference_date,
        );
        assert_eq!(record[age].parse::<i64>().ok(), derived.age);
        assert_eq!(record[group].parse::<AgeGroup>().ok(), derived.age_group);
        assert_eq!(record[stay].parse::<i64>().ok(), derived.length_of_stay);
    }
}

#[test]
fn test_gzip_exports_decompress() {
    let cfg = ReportConfig {
        gzip: true,
        charts: false,
        ..config("gzip")
    };
    run_report(&cfg).expect("Report failed");

    let file = std::fs::File::open(cfg.output_dir.join(format!("{FULL_TABLE}.gz")))
        .expect("gzip export missing");
    let mut text = String::new();
    flate2::read::GzDecoder::new(file)
        .read_to_string(&mut text)
        .expect("not gzip");
    assert!(text.starts_with("Patient_ID,DOB,"));
    assert!(!cfg.output_dir.join(GENDER_PIE).exists());
}

#[test]
fn test_strict_mode_rejects_malformed_rows() {
    let cfg = ReportConfig {
        strict: true,
        ..config("strict")
    };
    let err = run_report(&cfg).expect_err("strict run should fail");
    assert!(err.to_string().contains("malformed"));
    assert!(!cfg.output_dir.join(FULL_TABLE).exists());
}

#[test]
fn test_empty_patient_table_fails_aggregation() {
    let dir = output_dir("empty_input");
    std::fs::create_dir_all(&dir).expect("Failed to create dir");
    let patients = dir.join("patients.csv");
    std::fs::write(
        &patients,
        "Patient_ID,DOB,Admission_Date,Discharge_Date,Gender,Condition,Hospital_ID,Readmitted,Outcome\n",
    )
    .expect("Failed to write");

    let cfg = ReportConfig {
        patients: patients.to_string_lossy().into_owned(),
        ..config("empty")
    };
    let err = run_report(&cfg).expect_err("empty input should fail");
    assert_eq!(
        err.downcast_ref::<AnalysisError>(),
        Some(&AnalysisError::EmptyTable)
    );
}

#[test]
fn test_validate_reports_coverage_without_writing() {
    let cfg = config("validate");
    let validation = validate(&cfg).expect("Validation failed");

    assert_eq!(validation.patients, 6);
    assert_eq!(validation.hospitals, 3);
    assert_eq!(validation.treatments, 4);
    assert_eq!(validation.row_errors.len(), 1);
    assert_eq!(validation.merge.unmatched_hospital, 1);
    assert!(!cfg.output_dir.exists());
}

#[test]
fn test_reference_date_changes_ages() {
    let mut cfg = config("reference");
    cfg.reference_date = NaiveDate::from_ymd_opt(2034, 6, 1).expect("valid date");
    let sources =
        Sources::load(&cfg.patients, &cfg.hospitals, &cfg.treatments).expect("Failed to load");
    let analysis =
        analyze(&sources, cfg.reference_date, TreatmentJoin::FanOut).expect("Failed to analyze");

    assert_eq!(analysis.table.rows[0].age, Some(34));
}
