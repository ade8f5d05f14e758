use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn netboot() -> Command {
    Command::new(env!("CARGO_BIN_EXE_netboot"))
}

#[test]
fn help_lists_subcommands() {
    netboot()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("profiles"))
        .stdout(predicate::str::contains("doctor"));
}

#[test]
fn profiles_list_shows_every_architecture() {
    let dir = tempfile::tempdir().unwrap();
    netboot()
        .current_dir(dir.path())
        .args(["profiles", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("x86_64-unknown-uefi"))
        .stdout(predicate::str::contains("aarch64-unknown-uefi"))
        .stdout(predicate::str::contains("unsupported"));
}

#[test]
fn profiles_template_is_toml() {
    netboot()
        .args(["profiles", "template", "aarch64"])
        .assert()
        .success()
        .stdout(predicate::str::contains("build-target = \"aarch64-unknown-uefi\""))
        .stdout(predicate::str::contains("cpu-model = \"cortex-a72\""));
}

#[test]
fn unknown_architecture_is_a_usage_error() {
    netboot()
        .args(["build", "mips"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown architecture"));
}

#[test]
fn riscv64_run_reports_missing_profile() {
    let dir = tempfile::tempdir().unwrap();
    netboot()
        .current_dir(dir.path())
        .args(["run", "riscv64"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no usable profile for riscv64"));
}

#[test]
fn filter_collapses_firmware_noise() {
    let dir = tempfile::tempdir().unwrap();
    netboot()
        .current_dir(dir.path())
        .args(["filter", "x86_64"])
        .write_stdin("BdsDxe: loading Boot0001\nreal output\n")
        .assert()
        .success()
        .stdout("[BdsDxe]\nreal output\n");
}

#[test]
fn init_scaffolds_a_project() {
    let dir = tempfile::tempdir().unwrap();
    netboot()
        .current_dir(dir.path())
        .args(["init", "pxe-demo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created project 'pxe-demo'"));
    assert!(dir.path().join("pxe-demo/netboot.toml").is_file());
    assert!(dir.path().join("pxe-demo/profiles").is_dir());
}

#[cfg(unix)]
mod stubbed {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(path: &Path, body: &str) {
        std::fs::write(path, format!("#!/bin/sh\n{body}")).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// A project whose toolchain and x86_64 emulator are shell stubs.
    fn project(toolchain_body: &str, emulator_body: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        script(&root.join("toolchain.sh"), toolchain_body);
        script(&root.join("qemu.sh"), emulator_body);
        std::fs::create_dir_all(root.join("firmware")).unwrap();
        std::fs::write(root.join("firmware/OVMF.fd"), b"fw").unwrap();
        std::fs::write(
            root.join("netboot.toml"),
            format!(
                r#"[project]
name = "stubbed"

[toolchain]
program = "{root}/toolchain.sh"

[emulator.programs]
x86_64 = "{root}/qemu.sh"

[profiles.x86_64]
acceleration = "none"
"#,
                root = root.display()
            ),
        )
        .unwrap();
        dir
    }

    const BUILD_OK: &str = "mkdir -p target/x86_64-unknown-uefi/debug\n\
                            touch target/x86_64-unknown-uefi/debug/bootloader.efi\n";

    #[test]
    fn build_prints_artifact_path() {
        let dir = project(BUILD_OK, "exit 0\n");
        netboot()
            .current_dir(dir.path())
            .args(["build", "x86_64"])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                "target/x86_64-unknown-uefi/debug/bootloader.efi",
            ));
    }

    #[test]
    fn failed_build_exits_with_toolchain_code() {
        let dir = project(
            "echo 'error[E0425]: cannot find value' >&2\nexit 101\n",
            "touch emulator.ran\n",
        );
        netboot()
            .current_dir(dir.path())
            .args(["run", "x86_64"])
            .assert()
            .code(101)
            .stderr(predicate::str::contains("build failed for x86_64"))
            .stderr(predicate::str::contains("cannot find value"));
        assert!(!dir.path().join("emulator.ran").exists());
    }

    #[test]
    fn dry_run_prints_the_emulator_command() {
        let dir = project(BUILD_OK, "touch emulator.ran\n");
        netboot()
            .current_dir(dir.path())
            .args(["run", "x86_64", "--dry-run"])
            .assert()
            .success()
            .stdout(predicate::str::contains("-device e1000,netdev=net0"))
            .stdout(predicate::str::contains("bootfile=bootloader.efi"))
            .stdout(predicate::str::contains("firmware/OVMF.fd"));
        assert!(!dir.path().join("emulator.ran").exists());
    }

    #[test]
    fn run_filters_console_and_mirrors_exit_code() {
        let dir = project(
            BUILD_OK,
            "echo 'BdsDxe: failed to load Boot0001 \"UEFI QEMU DVD-ROM QM00003\" from PciRoot(0x0): Not Found'\n\
             echo 'hello from the guest'\n\
             exit 7\n",
        );
        netboot()
            .current_dir(dir.path())
            .args(["run", "x86_64"])
            .assert()
            .code(7)
            .stdout(predicate::str::contains("[BdsDxe: DVD-ROM skipped]"))
            .stdout(predicate::str::contains("hello from the guest"))
            .stdout(predicate::str::contains("QM00003").not());
    }

    #[test]
    fn missing_firmware_fails_before_launch() {
        let dir = project(BUILD_OK, "touch emulator.ran\n");
        std::fs::remove_file(dir.path().join("firmware/OVMF.fd")).unwrap();
        netboot()
            .current_dir(dir.path())
            .args(["run", "x86_64"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("firmware image"));
        assert!(!dir.path().join("emulator.ran").exists());
    }
}
