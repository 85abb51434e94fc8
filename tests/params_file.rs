mod common;

use common::{origin_from, UnitCircle};
use hopskip_rs::{Attack, AttackError, AttackParams, Constraint};
use std::env;
use std::fs;

#[test]
fn test_params_from_file_drive_attack() {
    let path = env::temp_dir().join(format!("hopskip_params_{}.json", std::process::id()));
    fs::write(
        &path,
        r#"{"constraint": "MSE", "num_iterations": 2, "gamma": 0.01,
            "clip_min": -3.0, "clip_max": 3.0, "initial_num_evals": 20,
            "stepsize_search": {"kind": "geometric_progression", "max_halvings": 30}}"#,
    )
    .unwrap();
    let params = AttackParams::from_json_file(&path).unwrap();
    fs::remove_file(&path).unwrap();
    assert_eq!(params.constraint, Constraint::L2);

    let attack = Attack::new(&UnitCircle, params).unwrap();
    let report = attack.attack(&[origin_from(1., 2.)]).unwrap();
    assert_eq!(report.diaries[0].iterations.len(), 2);
}

#[test]
fn test_missing_file_is_reported() {
    assert!(matches!(
        AttackParams::from_json_file("/nonexistent/params.json"),
        Err(AttackError::InvalidParameter { name: "path", .. })
    ));
}
