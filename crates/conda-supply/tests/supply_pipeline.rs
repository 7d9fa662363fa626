//! End-to-end runs of the supply pipeline with the real manifest, stager and
//! command runner. The Miniconda installer is a shell script served from a
//! `file://` URI that drops a fake `conda` into the install root.

#![cfg(unix)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use buildpack_kit::{BuildpackManifest, DirStager, Stager, SystemCommand};
use conda_supply::{profile_script, Conda, ProgressHandler, SupplyError, SupplyPhase};
use serial_test::serial;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use url::Url;

#[derive(Default)]
struct RecordingHandler {
    events: Mutex<Vec<SupplyPhase>>,
}

impl ProgressHandler for RecordingHandler {
    fn on_progress(&self, phase: SupplyPhase) {
        self.events.lock().unwrap().push(phase);
    }
}

struct Fixture {
    temp: TempDir,
    stager: DirStager,
    conda_log: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let build_dir = temp.path().join("build");
        fs::create_dir_all(&build_dir).unwrap();
        fs::write(
            build_dir.join("environment.yml"),
            "name: app\ndependencies:\n  - numpy\n",
        )
        .unwrap();

        let stager = DirStager::new(
            build_dir,
            temp.path().join("cache"),
            temp.path().join("deps"),
            "0",
        );
        let conda_log = temp.path().join("conda.log");

        Self {
            temp,
            stager,
            conda_log,
        }
    }

    /// An installer that creates `<prefix>/bin/conda`. The fake conda appends
    /// its arguments to `conda_log` and exits with `conda_status`.
    fn installer(&self, conda_status: i32) -> String {
        format!(
            r#"#!/bin/sh
set -e
prefix="$3"
mkdir -p "$prefix/bin"
cat > "$prefix/bin/conda" <<EOF
#!/bin/sh
echo "\$@" >> "{log}"
echo "conda \$1 finished"
exit {conda_status}
EOF
chmod 755 "$prefix/bin/conda"
echo "installed into $prefix"
"#,
            log = self.conda_log.display(),
        )
    }

    /// Write `installer` next to the app and a manifest offering it as
    /// `name`.
    fn manifest(&self, name: &str, installer: &str) -> BuildpackManifest {
        let path = self.temp.path().join(format!("{name}.sh"));
        fs::write(&path, installer).unwrap();

        let uri = Url::from_file_path(&path).unwrap();
        let sha256 = hex::encode(Sha256::digest(installer.as_bytes()));
        BuildpackManifest::from_yaml(&format!(
            "dependencies:\n\
             - name: {name}\n  version: 4.3.21\n  uri: {uri}\n  sha256: {sha256}\n  cf_stacks: [cflinuxfs2]\n"
        ))
        .unwrap()
        .with_stack("cflinuxfs2")
    }

    fn run(&self, manifest: &BuildpackManifest) -> (Result<(), SupplyError>, Vec<SupplyPhase>) {
        let handler = Arc::new(RecordingHandler::default());
        let result = Conda::new(manifest, &self.stager, &SystemCommand, handler.clone())
            .with_output(io::sink(), io::sink())
            .run();
        let events = handler.events.lock().unwrap().clone();
        (result, events)
    }

    fn conda_calls(&self) -> Vec<String> {
        fs::read_to_string(&self.conda_log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

fn profile_path(stager: &DirStager) -> PathBuf {
    stager.dep_dir().join("profile.d").join("conda.sh")
}

#[test]
#[serial]
fn test_supply_installs_conda_and_environment() {
    let fixture = Fixture::new();
    let manifest = fixture.manifest("miniconda2", &fixture.installer(0));

    let (result, events) = fixture.run(&manifest);

    assert!(result.is_ok(), "supply failed: {result:?}");
    assert_eq!(events.last().map(SupplyPhase::message), Some("Done"));

    let environment = fixture.stager.build_dir().join("environment.yml");
    assert_eq!(
        fixture.conda_calls(),
        vec![
            format!("env update --quiet -n dep_env -f {}", environment.display()),
            "clean -pt".to_string(),
        ]
    );

    let dep_dir = fixture.stager.dep_dir();
    assert_eq!(
        fs::read_link(dep_dir.join("bin").join("conda")).unwrap(),
        Path::new("../conda/bin/conda")
    );
    assert_eq!(
        fs::read_to_string(profile_path(&fixture.stager)).unwrap(),
        profile_script(&dep_dir, "0")
    );
}

#[test]
#[serial]
fn test_supply_picks_miniconda3_for_python3() {
    let fixture = Fixture::new();
    fs::write(
        fixture.stager.build_dir().join("runtime.txt"),
        "python-3.6.2\n",
    )
    .unwrap();
    let manifest = fixture.manifest("miniconda3", &fixture.installer(0));

    let (result, _) = fixture.run(&manifest);

    assert!(result.is_ok(), "supply failed: {result:?}");
    assert!(fixture.stager.dep_dir().join("conda/bin/conda").exists());
}

#[test]
#[serial]
fn test_supply_without_matching_dependency() {
    let fixture = Fixture::new();
    fs::write(
        fixture.stager.build_dir().join("runtime.txt"),
        "python-3.6.2\n",
    )
    .unwrap();
    let manifest = fixture.manifest("miniconda2", &fixture.installer(0));

    let (result, events) = fixture.run(&manifest);

    let err = result.unwrap_err();
    assert!(matches!(err, SupplyError::Download(_)));
    assert!(err.to_string().contains("miniconda3"));
    assert!(matches!(events.last(), Some(SupplyPhase::Error { .. })));
    assert!(!fixture.stager.dep_dir().join("conda").exists());
}

#[test]
#[serial]
fn test_supply_with_failing_installer() {
    let fixture = Fixture::new();
    let manifest = fixture.manifest("miniconda2", "#!/bin/sh\necho boom >&2\nexit 3\n");

    let (result, _) = fixture.run(&manifest);

    let err = result.unwrap_err();
    assert!(matches!(err, SupplyError::Install(_)));
    assert!(err.to_string().contains("exited with status 3"));
    assert!(fixture.conda_calls().is_empty());
    assert!(!profile_path(&fixture.stager).exists());
}

#[test]
#[serial]
fn test_supply_with_failing_conda() {
    let fixture = Fixture::new();
    let manifest = fixture.manifest("miniconda2", &fixture.installer(1));

    let (result, _) = fixture.run(&manifest);

    assert!(matches!(result, Err(SupplyError::EnvUpdate(_))));
    assert_eq!(fixture.conda_calls().len(), 1);
    assert!(!fixture.stager.dep_dir().join("bin").exists());
    assert!(!profile_path(&fixture.stager).exists());
}

#[test]
#[serial]
fn test_supply_rejects_tampered_installer() {
    let fixture = Fixture::new();
    let manifest = fixture.manifest("miniconda2", &fixture.installer(0));
    fs::write(
        fixture.temp.path().join("miniconda2.sh"),
        "#!/bin/sh\nexit 0\n",
    )
    .unwrap();

    let (result, _) = fixture.run(&manifest);

    let err = result.unwrap_err();
    assert!(err.to_string().contains("checksum mismatch"));
    assert!(fixture.conda_calls().is_empty());
}
