//! Output capture against the real process descriptors.
//!
//! Kept as a single test in its own binary: the harness prints nothing on
//! fd 1 while it runs, so captured text can be compared byte for byte.

use ecs_suite::capture::{capture, capture_text, emit};
use std::io::Write;

#[cfg(unix)]
fn identity(fd: i32) -> (u64, u64) {
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    assert_eq!(unsafe { libc::fstat(fd, &mut st) }, 0);
    (st.st_dev as u64, st.st_ino as u64)
}

#[cfg(unix)]
#[test]
fn capture_round_trips_and_restores_descriptors() {
    let stdout_before = identity(1);
    let stderr_before = identity(2);

    assert_eq!(capture_text(|| emit("alpha\nbeta\n")), "alpha\nbeta\n");
    assert_eq!(capture_text(|| {}), "");

    // Color sequences are passed through untouched; cleaning is the presenter's job.
    assert_eq!(
        capture_text(|| emit("\x1b[32mOK\x1b[0m\n")),
        "\x1b[32mOK\x1b[0m\n"
    );

    // Standard error is drained but not returned.
    let (captured, value) = capture(|| {
        emit("kept\n");
        let _ = std::io::stderr().write_all(b"dropped\n");
        7
    })
    .unwrap();
    assert_eq!(captured.stdout, "kept\n");
    assert_eq!(captured.stderr_bytes, "dropped\n".len());
    assert_eq!(value, 7);

    // Child processes inherit the redirected descriptor.
    let child = capture_text(|| {
        let status = std::process::Command::new("sh")
            .args(["-c", "printf 'from child\\n'; printf 'noise' >&2"])
            .status()
            .unwrap();
        assert!(status.success());
    });
    assert_eq!(child, "from child\n");

    // A session opened inside another one on the same thread stacks on it.
    let mut inner = String::new();
    let outer = capture_text(|| {
        emit("outer-before\n");
        inner = capture_text(|| emit("inner\n"));
        emit("outer-after\n");
    });
    assert_eq!(inner, "inner\n");
    assert_eq!(outer, "outer-before\nouter-after\n");
    assert_eq!(identity(1), stdout_before);
    assert_eq!(identity(2), stderr_before);

    // More than a pipe buffer's worth does not stall the writer.
    let big = "x".repeat(1 << 20);
    assert_eq!(capture_text(|| emit(&big)).len(), big.len());

    // A panicking closure still restores fd 1 and 2, and the next session works.
    let panicked = std::panic::catch_unwind(|| capture(|| panic!("job exploded")));
    assert!(panicked.is_err());
    assert_eq!(identity(1), stdout_before);
    assert_eq!(identity(2), stderr_before);
    assert_eq!(capture_text(|| emit("again\n")), "again\n");

    assert_eq!(identity(1), stdout_before);
    assert_eq!(identity(2), stderr_before);
}
