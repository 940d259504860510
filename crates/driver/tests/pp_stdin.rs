use assert_cmd::Command;
use predicates::prelude::*;

fn p4_pp() -> Command {
    let mut cmd = Command::cargo_bin("p4").unwrap();
    cmd.arg("pp");
    cmd
}

#[test]
fn pp_expands_defines_from_stdin() {
    p4_pp()
        .write_stdin("#define FOO 1\nFOO\n")
        .assert()
        .success()
        .stdout("1\n");
}

#[test]
fn pp_passes_through_plain_source() {
    let src = "header_type foo_t {\n\tfields {\n\t\tfoo : 8;\n\t}\n}\n";
    p4_pp().write_stdin(src).assert().success().stdout(src);
}

#[test]
fn pp_output_is_stable_under_a_second_pass() {
    let out = p4_pp()
        .write_stdin("#define FOO 2\nFOO\n")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(out, b"2\n");

    p4_pp().write_stdin(out.clone()).assert().success().stdout(out);
}

#[test]
fn pp_malformed_define_fails_with_diagnostic() {
    p4_pp()
        .write_stdin("#define FOO\nFOO\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid define preprocessor directive"));
}

#[test]
fn pp_missing_include_fails_with_diagnostic() {
    p4_pp()
        .write_stdin("#include \"definitely_not_here.p4\"\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("definitely_not_here.p4"));
}

#[test]
fn pp_flag_defines_macro() {
    p4_pp()
        .args(["-D", "FOO_BITS=8"])
        .write_stdin("foo : FOO_BITS;\n")
        .assert()
        .success()
        .stdout("foo : 8;\n");
}

#[test]
fn pp_flag_define_without_value_defaults_to_one() {
    p4_pp()
        .args(["-D", "FOO"])
        .write_stdin("foo : FOO;\n")
        .assert()
        .success()
        .stdout("foo : 1;\n");
}
