use assert_cmd::cargo::cargo_bin_cmd;

fn help_output(args: &[&str]) -> String {
    let assert = cargo_bin_cmd!("replica").args(args).assert().success();
    String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 help")
}

#[test]
fn top_level_help_lists_every_command() {
    let output = help_output(&["--help"]);
    for command in ["update", "clone", "sign", "verify", "show-config"] {
        assert!(output.contains(command), "help missing {command}: {output}");
    }
    assert!(output.contains("--json"), "help missing --json: {output}");
}

#[test]
fn clone_help_shows_usage() {
    let output = help_output(&["clone", "--help"]);
    assert!(
        output.contains("replica clone <SOURCE> <DEST> --config FILE --module DEX [--lib SO ...]"),
        "clone usage missing: {output}"
    );
    assert!(output.contains("--abi"), "clone help missing --abi: {output}");
}

#[test]
fn update_requires_a_config_document() {
    cargo_bin_cmd!("replica")
        .args(["update", "in.apk", "out.apk"])
        .assert()
        .failure()
        .code(2);
}
