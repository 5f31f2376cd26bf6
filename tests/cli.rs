use std::process::Command;

fn paddle_frog() -> Command {
    Command::new(env!("CARGO_BIN_EXE_paddle-frog"))
}

#[test]
fn missing_path_prints_usage_and_fails() {
    let output = paddle_frog().output().expect("Failed to run binary");

    assert!(!output.status.success());
    #[cfg(unix)]
    assert_eq!(output.status.code(), Some(255));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim_end(), "Path to image or directory not specified.");
}

#[test]
fn unreadable_input_fails_without_marker() {
    let output = paddle_frog()
        .arg("tests/data/does_not_exist.png")
        .args(["--det-model", "tests/data/models/missing.onnx"])
        .output()
        .expect("Failed to run binary");

    assert!(!output.status.success());
    assert!(!String::from_utf8_lossy(&output.stdout).contains("BEGIN PADDLE FROG"));
}

#[test]
#[ignore = "needs ONNX models under tests/data/models"]
fn valid_image_prints_marker_then_coordinate_lines() {
    let output = paddle_frog()
        .arg("tests/data/test_image.png")
        .args(["--det-model", "tests/data/models/det.onnx"])
        .args(["--cls-model", "tests/data/models/cls.onnx"])
        .output()
        .expect("Failed to run binary");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut lines = stdout.lines();
    assert_eq!(lines.next(), Some("BEGIN PADDLE FROG"));
    for line in lines {
        assert!(line.ends_with(' '), "{line:?} should end with a space");
        let numbers = line
            .split_whitespace()
            .map(|it| it.parse::<i32>().expect("coordinates are integers"))
            .collect::<Vec<_>>();
        assert!(!numbers.is_empty());
        assert_eq!(numbers.len() % 2, 0);
    }
}
