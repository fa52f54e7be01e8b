//! End-to-end pipeline runs against a scripted executor.
//!
//! Nothing here touches a disk: every external tool call is recorded and
//! answered by `FakeSystem`, and the mount root is a temporary directory.

use archey::command_executor::{CommandExecutor, CommandSpec, RawOutput};
use archey::events::{EventSink, InstallEvent, PipelineOutcome};
use archey::installer::{InstallOptions, Installer, spawn_installer};
use archey::profiles::DesktopProfile;
use archey::request::{InstallRequest, PartitionRef};
use archey::types::InstallMode;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const FSTAB: &str = "# /dev/sda2\nUUID=1111-2222\t/\text4\trw,relatime\t0 1\n";

const PARTED_FREE: &str = "\
Model: ATA Samsung SSD (scsi)
Disk /dev/sda: 476940MiB
Partition Table: gpt

Number  Start      End        Size       File system  Name  Flags
        0.02MiB    1.00MiB    0.98MiB    Free Space
 1      1.00MiB    513MiB     512MiB     fat32              boot, esp
        513MiB     476940MiB  476427MiB  Free Space
";

/// `parted -m` view after the FreeSpace run created sda2
const PARTED_MACHINE: &str = "\
BYT;
/dev/sda:476940MiB:scsi:512:512:gpt:ATA Samsung SSD:;
1:1.00MiB:513MiB:512MiB:fat32:EFI:boot, esp;
2:513MiB:41473MiB:40960MiB:ext4::;
";

#[derive(Default)]
struct Recorded {
    calls: Vec<String>,
    /// Whether the setup script existed when arch-chroot was asked to run it
    script_present_at_run: Option<bool>,
}

/// Answers tool calls the way a healthy live system would.
#[derive(Clone)]
struct FakeSystem {
    root: PathBuf,
    fail_program: Option<&'static str>,
    recorded: Arc<Mutex<Recorded>>,
}

impl FakeSystem {
    fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            fail_program: None,
            recorded: Arc::new(Mutex::new(Recorded::default())),
        }
    }

    fn failing(mut self, program: &'static str) -> Self {
        self.fail_program = Some(program);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.recorded.lock().expect("lock").calls.clone() // test: single-threaded access
    }

    fn ran(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }
}

impl CommandExecutor for FakeSystem {
    fn execute(&mut self, spec: &CommandSpec) -> io::Result<RawOutput> {
        let mut recorded = self.recorded.lock().expect("lock"); // test: never poisoned
        recorded.calls.push(spec.command_line());

        if self.fail_program == Some(spec.program.as_str()) {
            return Ok(RawOutput {
                output: format!("error: {} exploded", spec.program),
                exit_code: Some(1),
                ..RawOutput::default()
            });
        }

        if spec.args.iter().any(|a| a == "/root/archey_setup.sh") {
            let present = self.root.join("root/archey_setup.sh").is_file();
            recorded.script_present_at_run = Some(present);
        }

        let output = match spec.program.as_str() {
            "genfstab" => FSTAB.to_string(),
            "parted" if spec.args.iter().any(|a| a == "free") => PARTED_FREE.to_string(),
            "parted" if spec.args.iter().any(|a| a == "-m") => PARTED_MACHINE.to_string(),
            "lsblk" => "sda\nsda1\nsda2\n".to_string(),
            _ => String::new(),
        };
        Ok(RawOutput {
            output,
            exit_code: Some(0),
            ..RawOutput::default()
        })
    }
}

fn request(mode: InstallMode) -> InstallRequest {
    let mut request = InstallRequest {
        disk: "/dev/sda".to_string(),
        mode,
        hostname: "archbox".to_string(),
        username: "alice".to_string(),
        password: "s3cret".to_string(),
        target_size_gb: 40.0,
        ..InstallRequest::default()
    };
    if mode != InstallMode::Wipe {
        request.efi_partition = Some(PartitionRef::new("sda1", 512 * 1024 * 1024));
    }
    request
}

fn options(root: &Path) -> InstallOptions {
    InstallOptions {
        mount_root: root.join("mnt"),
        pacman_conf: root.join("pacman.conf"),
        theme_source: root.join("no-theme"),
        settle_delay: Duration::ZERO,
        verify_block_devices: false,
        ..InstallOptions::default()
    }
}

fn run_pipeline(
    request: InstallRequest,
    system: &FakeSystem,
    dir: &TempDir,
) -> (PipelineOutcome, Vec<InstallEvent>) {
    let (sink, rx) = EventSink::channel();
    let outcome = Installer::new(request, options(dir.path()), system.clone(), sink).run();
    (outcome, drain(rx))
}

fn drain(rx: Receiver<InstallEvent>) -> Vec<InstallEvent> {
    rx.try_iter().collect()
}

fn percents(events: &[InstallEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            InstallEvent::Progress(p) => Some(p.percent),
            _ => None,
        })
        .collect()
}

fn finished(events: &[InstallEvent]) -> Vec<&PipelineOutcome> {
    events
        .iter()
        .filter_map(|e| match e {
            InstallEvent::Finished(outcome) => Some(outcome),
            _ => None,
        })
        .collect()
}

#[test]
fn test_wipe_without_desktop_succeeds() {
    let dir = tempfile::tempdir().expect("tempdir"); // test: tmp writable
    let system = FakeSystem::new(&dir.path().join("mnt"));

    let (outcome, events) = run_pipeline(request(InstallMode::Wipe), &system, &dir);

    assert_eq!(outcome, PipelineOutcome::Succeeded);
    assert_eq!(percents(&events), vec![5, 15, 20, 25, 60, 65, 85, 97, 100]);
    assert_eq!(finished(&events), vec![&PipelineOutcome::Succeeded]);
    assert!(matches!(events.last(), Some(InstallEvent::Finished(_))));

    assert!(system.ran("wipefs -a /dev/sda"));
    assert!(system.ran("mkfs.ext4 -F /dev/sda2"));
    assert!(system.ran("mkfs.fat -F32 /dev/sda1"));
    assert!(!system.calls().iter().any(|c| c.contains("pacman -S --noconfirm")));
}

#[test]
fn test_fstab_written_and_setup_script_removed() {
    let dir = tempfile::tempdir().expect("tempdir"); // test: tmp writable
    let system = FakeSystem::new(&dir.path().join("mnt"));

    let (outcome, _) = run_pipeline(request(InstallMode::Wipe), &system, &dir);
    assert!(outcome.is_success());

    let root = system.root.clone();
    let fstab = fs::read_to_string(root.join("etc/fstab")).expect("fstab written"); // test: stage ran
    assert!(fstab.contains("UUID=1111-2222"));
    assert!(fstab.ends_with('\n'));

    let recorded = system.recorded.lock().expect("lock"); // test: worker finished
    assert_eq!(recorded.script_present_at_run, Some(true));
    assert!(!root.join("root/archey_setup.sh").exists());
}

#[test]
fn test_freespace_reuses_efi_without_formatting() {
    let dir = tempfile::tempdir().expect("tempdir"); // test: tmp writable
    let system = FakeSystem::new(&dir.path().join("mnt"));

    let (outcome, _) = run_pipeline(request(InstallMode::FreeSpace), &system, &dir);

    assert_eq!(outcome, PipelineOutcome::Succeeded);
    assert!(system.ran("parted -s /dev/sda mkpart primary ext4 513MiB 41473MiB"));
    assert!(system.ran("mkfs.ext4 -F /dev/sda2"));
    assert!(!system.ran("mkfs.fat"));
    assert!(!system.ran("wipefs"));
}

#[test]
fn test_command_failure_halts_pipeline() {
    let dir = tempfile::tempdir().expect("tempdir"); // test: tmp writable
    let system = FakeSystem::new(&dir.path().join("mnt")).failing("pacstrap");

    let (outcome, events) = run_pipeline(request(InstallMode::Wipe), &system, &dir);

    match &outcome {
        PipelineOutcome::Failed(reason) => {
            assert!(reason.contains("pacstrap"), "reason: {}", reason);
            assert!(reason.contains("exploded"), "reason: {}", reason);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(percents(&events), vec![5, 15, 20, 25]);
    assert!(events.iter().any(|e| matches!(
        e,
        InstallEvent::Log(line) if line.text.starts_with("Stopped during 'Installing base system")
            && line.text.ends_with("-> Installation failed)")
    )));
    assert_eq!(finished(&events).len(), 1);
    assert!(matches!(events.last(), Some(InstallEvent::Finished(PipelineOutcome::Failed(_)))));
    assert!(!system.ran("genfstab"));
    assert!(!system.ran("umount"));
}

#[test]
fn test_missing_efi_partition_fails_before_any_command() {
    let dir = tempfile::tempdir().expect("tempdir"); // test: tmp writable
    let system = FakeSystem::new(&dir.path().join("mnt"));
    let mut req = request(InstallMode::DualBoot);
    req.efi_partition = None;

    let (outcome, events) = run_pipeline(req, &system, &dir);

    assert!(matches!(outcome, PipelineOutcome::Failed(ref r) if r.contains("EFI")));
    assert_eq!(percents(&events), vec![5]);
    assert!(system.calls().is_empty());
}

#[test]
fn test_best_effort_cleanup_failure_still_succeeds() {
    let dir = tempfile::tempdir().expect("tempdir"); // test: tmp writable
    let system = FakeSystem::new(&dir.path().join("mnt")).failing("umount");

    let (outcome, events) = run_pipeline(request(InstallMode::Wipe), &system, &dir);

    assert_eq!(outcome, PipelineOutcome::Succeeded);
    assert_eq!(percents(&events).last(), Some(&100));
}

#[test]
fn test_desktop_stage_runs_on_worker_thread() {
    let dir = tempfile::tempdir().expect("tempdir"); // test: tmp writable
    let system = FakeSystem::new(&dir.path().join("mnt"));
    let mut req = request(InstallMode::Wipe);
    req.desktop = DesktopProfile::Xfce.to_selection();

    let handle = spawn_installer(req, options(dir.path()), system.clone()).expect("spawn"); // test: thread spawn
    let events: Vec<InstallEvent> = handle.events.iter().collect();
    let outcome = handle.join();

    assert_eq!(outcome, PipelineOutcome::Succeeded);
    assert_eq!(percents(&events), vec![5, 15, 20, 25, 60, 65, 85, 88, 97, 100]);
    assert_eq!(finished(&events).len(), 1);

    let root = dir.path().join("mnt").display().to_string();
    assert!(system.ran(&format!(
        "arch-chroot {} pacman -S --noconfirm xfce4 xfce4-goodies lightdm lightdm-gtk-greeter",
        root
    )));
    assert!(system.ran(&format!("arch-chroot {} systemctl enable lightdm", root)));
}

#[test]
fn test_log_lines_echo_commands_in_order() {
    let dir = tempfile::tempdir().expect("tempdir"); // test: tmp writable
    let system = FakeSystem::new(&dir.path().join("mnt"));

    let (_, events) = run_pipeline(request(InstallMode::Wipe), &system, &dir);
    let logs: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            InstallEvent::Log(line) => Some(line.text.as_str()),
            _ => None,
        })
        .collect();

    let pos = |needle: &str| {
        logs.iter()
            .position(|l| l.starts_with(needle))
            .unwrap_or_else(|| panic!("no log line starting with {:?}", needle))
    };
    assert!(pos("$ wipefs") < pos("$ mkfs.ext4"));
    assert!(pos("$ mkfs.ext4") < pos("$ pacstrap"));
    assert!(pos("$ pacstrap") < pos("$ genfstab"));
    assert!(pos("$ arch-chroot") < pos("$ umount"));
}

/// Blows up on the first tool call.
struct PanickingSystem;

impl CommandExecutor for PanickingSystem {
    fn execute(&mut self, _spec: &CommandSpec) -> io::Result<RawOutput> {
        panic!("executor bug");
    }
}

#[test]
fn test_worker_panic_still_sends_one_terminal_event() {
    let dir = tempfile::tempdir().expect("tempdir"); // test: tmp writable

    let handle = spawn_installer(request(InstallMode::Wipe), options(dir.path()), PanickingSystem)
        .expect("spawn"); // test: thread spawn
    let events: Vec<InstallEvent> = handle.events.iter().collect();
    let outcome = handle.join();

    assert!(matches!(outcome, PipelineOutcome::Failed(ref r) if r.contains("panicked")));
    assert_eq!(finished(&events), vec![&outcome]);
    assert!(matches!(events.last(), Some(InstallEvent::Finished(_))));
}
