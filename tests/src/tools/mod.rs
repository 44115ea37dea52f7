use jit_backend::{Pass, Pipeline, Stat};
use jit_irdump::{parse_pass, process, IrdumpError};

const DEAD_SUB: &str = "\
%0:
i32 %1 = load_context i32 0x38
i32 %2 = add i32 %1, i32 0x4
i32 %3 = sub i32 %1, i32 0x1
store_context i32 0x38, i32 %2
branch i32 0x8c0000a0
";

const TWO_LOADS: &str = "\
%0:
i32 %1 = load_context i32 0x38
i32 %2 = load_context i32 0x38
i32 %3 = add i32 %1, i32 %2
store_context i32 0x3c, i32 %3
branch i32 0x0
";

#[test]
fn test_irdump_parse_pass() {
    assert_eq!(parse_pass("dce").unwrap(), Pass::Dce);
    assert_eq!(parse_pass("DCE").unwrap(), Pass::Dce);
    assert_eq!(parse_pass("ra").unwrap(), Pass::Ra);
    let err = parse_pass("bogus").unwrap_err();
    assert!(matches!(err, IrdumpError::UnknownPass(ref name) if name == "bogus"));
    assert!(err.to_string().contains("lse, cprop, esimp, dce, ra"));
}

#[test]
fn test_irdump_dce() {
    crate::init_logging();
    let mut pipeline = Pipeline::new();
    let out = process(DEAD_SUB, &[Pass::Dce], &mut pipeline).unwrap();
    assert!(!out.contains("sub"), "{out}");
    assert!(out.contains("add i32 %1, i32 0x4"), "{out}");
    assert!(out.contains("branch i32 0x8c0000a0"), "{out}");
    assert_eq!(pipeline.stats.get(Stat::DeadRemoved), 1);
}

#[test]
fn test_irdump_passes_run_in_order() {
    crate::init_logging();
    let mut pipeline = Pipeline::new();
    let out = process(TWO_LOADS, &[Pass::Lse, Pass::Dce], &mut pipeline).unwrap();
    assert_eq!(out.matches("load_context").count(), 1, "{out}");
    assert_eq!(pipeline.stats.get(Stat::LoadsRemoved), 1);
}

#[test]
fn test_irdump_no_passes_round_trips() {
    let mut pipeline = Pipeline::new();
    let out = process(DEAD_SUB, &[], &mut pipeline).unwrap();
    assert_eq!(out.trim_end(), DEAD_SUB.trim_end());
}

#[test]
fn test_irdump_parse_error() {
    let mut pipeline = Pipeline::new();
    let err = process("%0:\ni32 %1 = frobnicate i32 0x1\n", &[], &mut pipeline).unwrap_err();
    assert!(matches!(err, IrdumpError::Parse(_)), "{err}");
}
