// ExitOnOutOfMemoryError ends the process, so the test runs itself again as a child process.
mod common;

use std::process::Command;
use vmheap::memory_manager;
use vmheap::util::constants::{BYTES_IN_KBYTE, OUT_OF_MEMORY_EXIT_CODE};
use vmheap::HeapBuilder;

const CHILD_ENV: &str = "VMHEAP_TEST_OOM_CHILD";
const TEST_NAME: &str = "exit_on_out_of_memory_error_ends_the_process";

fn run_out_of_memory() {
    let builder = HeapBuilder {
        options: common::options(&[
            ("InitialHeapSize", "64K"),
            ("MaxHeapSize", "64K"),
            ("ExitOnOutOfMemoryError", "true"),
        ]),
    };
    let heap = builder.build().unwrap();
    let mut mutator = memory_manager::bind_mutator(&heap);
    memory_manager::alloc(&mut mutator, 128 * BYTES_IN_KBYTE);
    // Not reached: the allocation above exits.
    std::process::exit(0);
}

#[test]
fn exit_on_out_of_memory_error_ends_the_process() {
    if std::env::var_os(CHILD_ENV).is_some() {
        run_out_of_memory();
    }
    let status = Command::new(std::env::current_exe().unwrap())
        .args(["--exact", TEST_NAME, "--test-threads=1"])
        .env(CHILD_ENV, "1")
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(OUT_OF_MEMORY_EXIT_CODE));
}
