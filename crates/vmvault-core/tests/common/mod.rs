//! Shared fixtures for the workflow tests.
//!
//! [`FakeHost`] stands in for libvirt, 7-Zip and podman. Filesystem tools
//! (`sha1sum`, `mkdir`, `mv`, `test`, `rm`, `find`) run for real, unelevated,
//! against temp directories.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::TempDir;
use vmvault_core::domain_xml::DomainXml;
use vmvault_core::{
    CommandOutput, CommandSpec, Config, Context, Passphrase, Prompter, Result, RunToken, Runner,
    SystemRunner, TempTracker,
};

type Predicate = Box<dyn Fn(&CommandSpec) -> bool + Send + Sync>;

#[derive(Default)]
struct FakeArchive {
    password: String,
    entries: Vec<(String, Vec<u8>)>,
}

impl FakeArchive {
    /// Deterministic on-disk image so the archive can be hashed and tampered with.
    fn image(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, bytes) in &self.entries {
            out.extend_from_slice(name.as_bytes());
            out.push(0);
            out.extend_from_slice(bytes.len().to_string().as_bytes());
            out.push(0);
            out.extend_from_slice(bytes);
        }
        out
    }
}

#[derive(Default)]
struct HostState {
    domains: BTreeMap<String, String>,
    disks: BTreeMap<String, Vec<PathBuf>>,
    archives: BTreeMap<PathBuf, FakeArchive>,
    calls: Vec<String>,
    image_present: bool,
}

/// Simulated hypervisor host.
#[derive(Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
    fail_when: Mutex<Option<Predicate>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define `name` with `xml` and report `disks` from `domblklist`.
    pub fn add_vm(&self, name: &str, xml: &str, disks: Vec<PathBuf>) {
        let mut state = self.state.lock().unwrap();
        state.domains.insert(name.to_string(), xml.to_string());
        state.disks.insert(name.to_string(), disks);
    }

    pub fn undefine(&self, name: &str) {
        self.state.lock().unwrap().domains.remove(name);
    }

    pub fn defined_xml(&self, name: &str) -> Option<String> {
        self.state.lock().unwrap().domains.get(name).cloned()
    }

    pub fn set_image_present(&self, present: bool) {
        self.state.lock().unwrap().image_present = present;
    }

    /// Make every command matching `predicate` exit with status 2.
    pub fn fail_when(&self, predicate: impl Fn(&CommandSpec) -> bool + Send + Sync + 'static) {
        *self.fail_when.lock().unwrap() = Some(Box::new(predicate));
    }

    /// Every command line seen so far.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn ran(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }

    /// Entry names of an archive, in insertion order.
    pub fn entries(&self, archive: &Path) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .archives
            .get(archive)
            .map(|a| a.entries.iter().map(|(n, _)| n.clone()).collect())
            .unwrap_or_default()
    }

    pub fn entry(&self, archive: &Path, name: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let found = state.archives.get(archive)?;
        found
            .entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, b)| b.clone())
    }

    /// Flip the first byte of entry `name` and rewrite the archive file.
    pub fn corrupt_entry(&self, archive: &Path, name: &str) {
        let mut state = self.state.lock().unwrap();
        let found = state.archives.get_mut(archive).unwrap();
        let (_, bytes) = found.entries.iter_mut().find(|(n, _)| n == name).unwrap();
        bytes[0] ^= 0xff;
        fs::write(archive, found.image()).unwrap();
    }

    fn virsh(&self, args: &[String]) -> Result<CommandOutput> {
        assert_eq!(args[0], "-c");
        let mut state = self.state.lock().unwrap();
        Ok(match args[2].as_str() {
            "list" => {
                let names: Vec<&str> = state.domains.keys().map(String::as_str).collect();
                CommandOutput::ok(format!("{}\n\n", names.join("\n")))
            }
            "dominfo" => match state.domains.contains_key(&args[3]) {
                true => CommandOutput::ok(format!("Name:           {}\n", args[3])),
                false => CommandOutput::failed(1, "error: failed to get domain"),
            },
            "dumpxml" => match state.domains.get(&args[3]) {
                Some(xml) => CommandOutput::ok(xml.clone()),
                None => CommandOutput::failed(1, "error: failed to get domain"),
            },
            "domblklist" => {
                let mut table = String::from(" Type   Device   Target   Source\n");
                table.push_str("--------------------------------------------\n");
                for (i, disk) in state.disks.get(&args[3]).into_iter().flatten().enumerate() {
                    table.push_str(&format!(" file   disk     vd{}      {}\n", (b'a' + i as u8) as char, disk.display()));
                }
                table.push_str(" file   cdrom    sda      -\n");
                CommandOutput::ok(table)
            }
            "define" => {
                let xml = fs::read_to_string(&args[3]).unwrap();
                let name = DomainXml::parse(&xml)?.name;
                state.domains.insert(name.clone(), xml);
                CommandOutput::ok(format!("Domain '{name}' defined from {}\n", args[3]))
            }
            other => CommandOutput::failed(1, format!("unsupported virsh command {other}")),
        })
    }

    fn seven_zip(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let args = spec.arg_strings();
        assert!(args.iter().any(|a| a == "-p"), "7z must prompt for the passphrase");
        // `a` asks for the passphrase twice, `x` and `t` once.
        let input = spec
            .input()
            .map(|i| String::from_utf8(i.expose().to_vec()).unwrap())
            .unwrap_or_default();
        let mut lines = input.lines();
        let password = lines.next().unwrap_or_default().to_string();
        if args[0] == "a" && lines.next() != Some(password.as_str()) {
            return Ok(CommandOutput::failed(2, "ERROR: Passwords do not match"));
        }
        let positional: Vec<&String> = args[1..].iter().filter(|a| !a.starts_with('-')).collect();
        let archive_path = PathBuf::from(positional[0]);
        let mut state = self.state.lock().unwrap();

        match args[0].as_str() {
            "a" => {
                let cwd = spec.cwd().unwrap().to_path_buf();
                let archive = state
                    .archives
                    .entry(archive_path.clone())
                    .or_insert_with(|| FakeArchive {
                        password: password.clone(),
                        entries: Vec::new(),
                    });
                if archive.password != password {
                    return Ok(CommandOutput::failed(2, "ERROR: Wrong password"));
                }
                for name in &positional[1..] {
                    let bytes = fs::read(cwd.join(name)).unwrap();
                    archive.entries.retain(|(n, _)| n != *name);
                    archive.entries.push((name.to_string(), bytes));
                }
                fs::write(&archive_path, archive.image()).unwrap();
                Ok(CommandOutput::ok("Everything is Ok\n"))
            }
            "x" | "t" => {
                let Some(archive) = state.archives.get(&archive_path) else {
                    return Ok(CommandOutput::failed(2, "ERROR: Can not open the file as archive"));
                };
                if archive.password != password {
                    return Ok(CommandOutput::failed(2, "ERROR: Wrong password"));
                }
                if args[0] == "x" {
                    let dest = args
                        .iter()
                        .find_map(|a| a.strip_prefix("-o"))
                        .map(PathBuf::from)
                        .unwrap();
                    fs::create_dir_all(&dest).unwrap();
                    for (name, bytes) in &archive.entries {
                        fs::write(dest.join(name), bytes).unwrap();
                    }
                }
                Ok(CommandOutput::ok("Everything is Ok\n"))
            }
            other => Ok(CommandOutput::failed(7, format!("unsupported 7z command {other}"))),
        }
    }

    fn podman(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let args = spec.arg_strings();
        match args[0].as_str() {
            "image" => {
                let present = self.state.lock().unwrap().image_present;
                Ok(if present {
                    CommandOutput::ok("")
                } else {
                    CommandOutput::failed(1, "")
                })
            }
            "build" => {
                self.set_image_present(true);
                Ok(CommandOutput::ok(""))
            }
            "rmi" => {
                self.set_image_present(false);
                Ok(CommandOutput::ok(""))
            }
            "run" => {
                let mut i = 1;
                let mut cwd = None;
                while i < args.len() {
                    match args[i].as_str() {
                        "--rm" | "-i" => i += 1,
                        "-v" => i += 2,
                        "-w" => {
                            cwd = Some(PathBuf::from(&args[i + 1]));
                            i += 2;
                        }
                        _ => break,
                    }
                }
                // args[i] is the image; the inner command follows.
                let mut inner = CommandSpec::new(args[i + 1].as_str()).args(&args[i + 2..]);
                if let Some(dir) = cwd {
                    inner = inner.current_dir(dir);
                }
                if let Some(input) = spec.input() {
                    assert!(args.iter().any(|a| a == "-i"), "stdin input needs podman run -i");
                    inner = inner.stdin_secret(input.clone());
                }
                self.run(&inner)
            }
            other => Ok(CommandOutput::failed(125, format!("unsupported podman command {other}"))),
        }
    }
}

impl Runner for FakeHost {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.state.lock().unwrap().calls.push(spec.to_string());
        if let Some(predicate) = self.fail_when.lock().unwrap().as_ref() {
            if predicate(spec) {
                return Ok(CommandOutput::failed(2, "injected failure"));
            }
        }
        let args = spec.arg_strings();
        match spec.program() {
            "virsh" => self.virsh(&args),
            "7z" => self.seven_zip(spec),
            "podman" => self.podman(spec),
            "restorecon" | "sudo" => Ok(CommandOutput::ok("")),
            _ => SystemRunner::new(false).run(spec),
        }
    }
}

/// One scripted answer.
#[derive(Debug)]
pub enum Answer {
    Select(Option<usize>),
    Pass(&'static str),
    Confirm(bool),
}

/// Replays answers in order and panics on an unexpected question.
#[derive(Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<Answer>>,
    pub banners: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new(answers: Vec<Answer>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            banners: Mutex::new(Vec::new()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.answers.lock().unwrap().len()
    }

    fn next(&self, prompt: &str) -> Answer {
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("no scripted answer for {prompt:?}"))
    }
}

impl Prompter for ScriptedPrompter {
    fn select(&self, prompt: &str, _items: &[String]) -> Result<Option<usize>> {
        match self.next(prompt) {
            Answer::Select(choice) => Ok(choice),
            other => panic!("{prompt:?}: expected a selection, scripted {other:?}"),
        }
    }

    fn passphrase(&self, prompt: &str) -> Result<Passphrase> {
        match self.next(prompt) {
            Answer::Pass(text) => Ok(Passphrase::new(text)),
            other => panic!("{prompt:?}: expected a passphrase, scripted {other:?}"),
        }
    }

    fn confirm(&self, prompt: &str, _default: bool) -> Result<bool> {
        match self.next(prompt) {
            Answer::Confirm(yes) => Ok(yes),
            other => panic!("{prompt:?}: expected a confirmation, scripted {other:?}"),
        }
    }

    fn banner(&self, text: &str) {
        self.banners.lock().unwrap().push(text.to_string());
    }
}

pub fn fixture(name: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    fs::read_to_string(path).unwrap()
}

/// Temp directories, a fake host and a config wired together.
pub struct Bench {
    pub backup: TempDir,
    pub images: TempDir,
    pub data: TempDir,
    pub scratch: TempDir,
    pub host: FakeHost,
    pub config: Config,
    pub tracker: TempTracker,
}

impl Bench {
    pub fn new() -> Self {
        let backup = TempDir::new().unwrap();
        let images = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let mut config = Config::new(backup.path());
        config.elevate = false;
        let tracker = TempTracker::in_dir(scratch.path(), RunToken::generate());
        Self {
            backup,
            images,
            data,
            scratch,
            host: FakeHost::new(),
            config,
            tracker,
        }
    }

    pub fn ctx<'a>(&'a self, prompter: &'a ScriptedPrompter) -> Context<'a> {
        Context::new(&self.config, &self.host, prompter, &self.tracker)
    }

    /// Define `alpha` with one disk `alpha.qcow2`. Returns the disk path.
    pub fn add_alpha(&self) -> PathBuf {
        let disk = self.images.path().join("alpha.qcow2");
        fs::write(&disk, b"alpha disk contents").unwrap();
        self.host.add_vm("alpha", &self.alpha_xml(), vec![disk.clone()]);
        disk
    }

    pub fn alpha_xml(&self) -> String {
        fixture("alpha.xml").replace("@IMAGES@", &self.images.path().display().to_string())
    }

    /// Define `beta` with disks in two directories. Returns both paths.
    pub fn add_beta(&self) -> Vec<PathBuf> {
        let system = self.images.path().join("beta.qcow2");
        let data = self.data.path().join("beta-data.img");
        fs::write(&system, b"beta system disk").unwrap();
        fs::write(&data, b"beta data disk").unwrap();
        let xml = fixture("beta.xml")
            .replace("@IMAGES@", &self.images.path().display().to_string())
            .replace("@DATA@", &self.data.path().display().to_string());
        self.host.add_vm("beta", &xml, vec![system.clone(), data.clone()]);
        vec![system, data]
    }

    pub fn archive(&self, vm: &str) -> PathBuf {
        self.config.archive_path(vm)
    }

    /// Names in the backup directory, sorted.
    pub fn backup_listing(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.backup.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

/// Prompter answers for a verified `export_vm` with passphrase `pw`.
pub fn verified_export(pw: &'static str) -> ScriptedPrompter {
    ScriptedPrompter::new(vec![Answer::Confirm(true), Answer::Pass(pw)])
}
