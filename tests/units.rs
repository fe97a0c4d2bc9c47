//! End-to-end runs against a shell script standing in for ctags.
#![cfg(unix)]

use camino_tempfile::{tempdir, Utf8TempDir};
use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Once,
    time::{Duration, Instant},
};
use structopt::StructOpt;
use units::{
    cli::{Command, Opts},
    config::{RunConfig, TmainConfig},
    errors::UnitsError,
    executor::{self, pool::CancelToken},
};

const FAKE_CTAGS: &str = r#"#!/bin/sh
mode=run
input=
files=
opts=
anonpath=
for a in "$@"; do
    case "$a" in
        --list-features) mode=features ;;
        --print-language) mode=lang ;;
        --list-languages) mode=langs ;;
        --_force-quit=0) mode=dry ;;
        --_anonhash=*) mode=anon; anonpath="${a#--_anonhash=}" ;;
        --options=NONE) ;;
        --options=*) opts="${a#--options=}" ;;
        -*) ;;
        *) [ -z "$input" ] && input="$a"; files="$files $a" ;;
    esac
done
case $mode in
    features) echo "regex   Regular expression support"; exit 0 ;;
    langs) echo C; exit 0 ;;
    lang) if grep -q HANGPROBE "$input"; then sleep 30; fi; echo "$input: C"; exit 0 ;;
    anon) case "$anonpath" in ./Units/*) echo bbbbbbbb ;; *) echo aaaaaaaa ;; esac; exit 0 ;;
    dry) if grep -q BROKEN "$opts"; then exit 1; fi; exit 0 ;;
esac
if grep -q LOOP "$input"; then sleep 30; fi
if grep -q SLOW "$input"; then sleep 2; fi
if grep -q EXIT2 "$input"; then echo boom >&2; exit 2; fi
if grep -q ANON "$input"; then printf '__anonaaaaaaaa\t%s\t/^struct {$/;"\ts\n' "$input"; fi
for f in $files; do printf 'main\t%s\t/^int main()$/;"\tf\n' "$f"; done
"#;

/// Runs the wrapped command and reports a memory error for inputs that ask
/// for one.
const FAKE_VALGRIND: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
    case "$1" in
        --*) shift ;;
        *) break ;;
    esac
done
"$@"
code=$?
for a in "$@"; do
    case "$a" in
        *input.c) if grep -q LEAK "$a"; then exit 58; fi ;;
    esac
done
exit $code
"#;

static TOOLS: Once = Once::new();

/// Put the fake memory checker on `PATH`. Every test calls this before it
/// spawns anything.
fn setup() {
    TOOLS.call_once(|| {
        let bin = std::env::temp_dir().join(format!("units-tools-{}", std::process::id()));
        let valgrind = bin.join("valgrind");
        write(&valgrind, FAKE_VALGRIND);
        fs::set_permissions(&valgrind, fs::Permissions::from_mode(0o755)).unwrap();
        let path = std::env::var_os("PATH").unwrap_or_default();
        let mut dirs = vec![bin];
        dirs.extend(std::env::split_paths(&path));
        std::env::set_var("PATH", std::env::join_paths(dirs).unwrap());
    });
}

const EXPECTED: &str = "main\tinput.c\t/^int main()$/;\"\tf\n";

fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn install_subject(root: &Path) -> PathBuf {
    let ctags = root.join("bin/ctags");
    write(&ctags, FAKE_CTAGS);
    fs::set_permissions(&ctags, fs::Permissions::from_mode(0o755)).unwrap();
    ctags
}

fn case(units: &Path, dir: &str, input: &str, expected: Option<(&str, &str)>) {
    write(&units.join(dir).join("input.c"), input);
    if let Some((name, contents)) = expected {
        write(&units.join(dir).join(name), contents);
    }
}

fn run_config(args: &[&str]) -> RunConfig {
    match Opts::from_iter_safe(args).unwrap().command {
        Command::Run(run) => RunConfig::new(run).unwrap(),
        other => panic!("unexpected {:?}", other),
    }
}

async fn run(config: RunConfig) -> Result<i32, UnitsError> {
    executor::run_units(config, CancelToken::never()).await
}

fn result(build: &Path, dir: &str) -> String {
    fs::read_to_string(build.join(dir).join("RESULT.tmp")).unwrap_or_default()
}

fn tree() -> (Utf8TempDir, PathBuf, PathBuf, PathBuf) {
    setup();
    let tmp = tempdir().unwrap();
    let root = tmp.path().as_std_path().to_path_buf();
    let ctags = install_subject(&root);
    let units = root.join("Units");
    let build = root.join("build");
    (tmp, ctags, units, build)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn classifies_a_mixed_tree() {
    let (_tmp, ctags, units, build) = tree();
    case(&units, "foo.d", "int main() {}\n", Some(("expected.tags", EXPECTED)));
    case(&units, "bar.b", "EXIT2\n", Some(("expected.tags", EXPECTED)));
    case(&units, "baz.i", "LOOP\n", None);
    case(&units, "qux.d", "int main() {}\n", Some(("expected.tags-json", "{}\n")));
    case(&units, "diff.d", "int main() {}\n", Some(("expected.tags", "other\n")));
    case(&units, "fixed.b", "int main() {}\n", Some(("expected.tags", EXPECTED)));
    case(&units, "broken.d", "int main() {}\n", None);
    write(&units.join("broken.d/args.ctags"), "BROKEN\n");
    case(&units, "parser.r/nested.d", "int main() {}\n", None);
    write(&units.join("parser.r/nested.d/data.txt"), "aux\n");
    case(&units, "notacase", "int main() {}\n", None);

    let config = run_config(&[
        "units",
        "run",
        "--ctags",
        ctags.to_str().unwrap(),
        "--colorized-output=no",
        units.to_str().unwrap(),
        build.to_str().unwrap(),
    ]);
    let code = run(config).await.unwrap();
    assert_eq!(code, 1);

    assert_eq!(result(&build, "foo.d"), "");
    assert!(!build.join("foo.d/RAWOUT.tmp").exists());
    assert!(result(&build, "bar.b").contains("failed (KNOWN bug)"));
    assert!(build.join("bar.b/CMDLINE.tmp").is_file());
    assert!(result(&build, "baz.i").contains("skipped (may cause an infinite loop)"));
    assert!(result(&build, "qux.d")
        .contains("skipped (required feature \"json\" is not available)"));
    assert!(result(&build, "diff.d").contains("failed (unexpected output)"));
    assert!(build.join("diff.d/DIFF.tmp").is_file());
    assert_eq!(
        fs::read_to_string(build.join("diff.d/FILTERED.tmp")).unwrap(),
        EXPECTED
    );
    assert_eq!(result(&build, "fixed.b"), "");
    // Broken options leave no result file.
    assert_eq!(result(&build, "broken.d"), "");
    assert!(!build.join("notacase").exists());
    // Passing cases clean up their bundled files.
    assert!(!build.join("parser.r/nested.d/data.txt").exists());
    assert!(!build.join("parser.r/nested.d/BUNDLES").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn passing_tree_exits_zero_and_filters_apply() {
    let (_tmp, ctags, units, build) = tree();
    case(&units, "foo.d", "int main() {}\n", Some(("expected.tags", EXPECTED)));
    case(&units, "diff.d", "int main() {}\n", Some(("expected.tags", "other\n")));
    case(&units, "parser.r/bar.b", "EXIT2\n", None);

    let config = run_config(&[
        "units",
        "run",
        "--ctags",
        ctags.to_str().unwrap(),
        "--colorized-output=no",
        "--units=foo,parser.r/bar",
        units.to_str().unwrap(),
        build.to_str().unwrap(),
    ]);
    assert_eq!(run(config).await.unwrap(), 0);
    assert!(!build.join("diff.d").exists());
    assert!(result(&build, "parser.r/bar.b").contains("KNOWN bug"));

    let config = run_config(&[
        "units",
        "run",
        "--ctags",
        ctags.to_str().unwrap(),
        "--colorized-output=no",
        "--languages=Go",
        units.to_str().unwrap(),
        build.to_str().unwrap(),
    ]);
    assert_eq!(run(config).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deadline_times_out_looping_cases() {
    let (_tmp, ctags, units, build) = tree();
    case(&units, "spin.i", "LOOP\n", Some(("expected.tags", EXPECTED)));

    let config = run_config(&[
        "units",
        "run",
        "--ctags",
        ctags.to_str().unwrap(),
        "--colorized-output=no",
        "--with-timeout=1",
        units.to_str().unwrap(),
        build.to_str().unwrap(),
    ]);
    let begin = Instant::now();
    assert_eq!(run(config).await.unwrap(), 1);
    assert!(begin.elapsed() < Duration::from_secs(20));
    assert!(result(&build, "spin.i").contains("failed (TIMED OUT)"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_feature_list_is_fatal_before_cases_run() {
    setup();
    let tmp = tempdir().unwrap();
    let units = tmp.path().as_std_path().join("Units");
    case(&units, "foo.d", "int main() {}\n", None);
    let config = run_config(&[
        "units",
        "run",
        "--ctags=/nonexistent/ctags",
        units.to_str().unwrap(),
    ]);
    assert!(run(config).await.is_err());
    assert!(!units.join("foo.d/RESULT.tmp").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tmain_compares_aspects() {
    setup();
    let tmp = tempdir().unwrap();
    let root = tmp.path().as_std_path();
    let tmain = root.join("Tmain");
    let build = root.join("build");

    write(&tmain.join("ok.d/run.sh"), "echo hello\nexit 0\n");
    write(&tmain.join("ok.d/stdout-expected.txt"), "hello\n");
    write(&tmain.join("ok.d/exit-expected.txt"), "0\n");
    write(&tmain.join("bad.d/run.sh"), "echo bye\n");
    write(&tmain.join("bad.d/stdout-expected.txt"), "hello\n");
    write(&tmain.join("skip.d/run.sh"), "echo 'no readtags'\nexit 77\n");
    write(&tmain.join("tags.d/run.sh"), "printf 'a\\tb\\n' > \"$2/tags\"\n");
    write(&tmain.join("tags.d/tags-expected.txt"), "a\tb\n");

    let opts = Opts::from_iter_safe(&[
        "units",
        "tmain",
        "--colorized-output=no",
        tmain.to_str().unwrap(),
        build.to_str().unwrap(),
    ])
    .unwrap();
    let config = match opts.command {
        Command::Tmain(t) => TmainConfig::new(t).unwrap(),
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(executor::run_tmain(config, CancelToken::never()).await.unwrap(), 1);

    assert!(!build.join("ok.d/stdout-actual.txt").exists());
    assert!(!build.join("ok.d/exit-actual.txt").exists());
    assert!(!build.join("ok.d/stderr-actual.txt").exists());
    assert!(build.join("bad.d/stdout-actual.txt").is_file());
    assert!(fs::read_to_string(build.join("bad.d/stdout-diff.txt"))
        .unwrap()
        .contains("+hello"));
    assert!(!build.join("skip.d/exit-actual.txt").exists());
    assert!(!build.join("tags.d/tags-actual.txt").exists());
    assert!(!build.join("tags.d/tags").exists());
}

fn plain_run(ctags: &Path, units: &Path, build: &Path, extra: &[&str]) -> RunConfig {
    let mut args = vec![
        "units",
        "run",
        "--ctags",
        ctags.to_str().unwrap(),
        "--colorized-output=no",
    ];
    args.extend_from_slice(extra);
    args.push(units.to_str().unwrap());
    args.push(build.to_str().unwrap());
    run_config(&args)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn language_probe_is_bounded_by_the_deadline() {
    let (_tmp, ctags, units, build) = tree();
    case(&units, "spin.i", "HANGPROBE\n", None);

    let config = plain_run(&ctags, &units, &build, &["--with-timeout=1"]);
    let begin = Instant::now();
    let code = tokio::time::timeout(Duration::from_secs(8), run(config))
        .await
        .expect("run finished within the deadline")
        .unwrap();
    assert!(begin.elapsed() < Duration::from_secs(8));
    // An unknown language is not a failure; the case still runs.
    assert_eq!(code, 0);
    assert_eq!(result(&build, "spin.i"), "");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn anonymous_identifiers_are_canonicalized() {
    let (_tmp, ctags, units, build) = tree();
    let tagged = "__anonbbbbbbbb\tinput.c\t/^struct {$/;\"\ts\n".to_string() + EXPECTED;
    case(&units, "anon.d", "ANON\n", Some(("expected.tags", &tagged)));
    case(&units, "anonbug.b", "ANON\n", Some(("expected.tags", "nothing\n")));

    let config = plain_run(&ctags, &units, &build, &[]);
    assert_eq!(run(config).await.unwrap(), 0);

    assert_eq!(result(&build, "anon.d"), "");
    assert!(result(&build, "anonbug.b").contains("failed (KNOWN bug)"));
    assert_eq!(
        fs::read_to_string(build.join("anonbug.b/FILTERED.tmp")).unwrap(),
        tagged
    );
    let cmdline = fs::read_to_string(build.join("anonbug.b/CMDLINE.tmp")).unwrap();
    assert!(cmdline.contains(" -e s/aaaaaaaa/bbbbbbbb/g"), "{}", cmdline);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn extra_inputs_follow_the_primary_input() {
    let (_tmp, ctags, units, build) = tree();
    let both = EXPECTED.to_string() + "main\tinput-1.h\t/^int main()$/;\"\tf\n";
    case(&units, "multi.d", "int main() {}\n", Some(("expected.tags", &both)));
    write(&units.join("multi.d/input-1.h"), "int main() {}\n");
    case(&units, "multibug.b", "EXIT2\n", None);
    write(&units.join("multibug.b/input_2.h"), "\n");

    let config = plain_run(&ctags, &units, &build, &[]);
    assert_eq!(run(config).await.unwrap(), 0);

    assert_eq!(result(&build, "multi.d"), "");
    let report = result(&build, "multibug.b");
    assert!(report.starts_with("Testing multibug as C (multi inputs)"), "{}", report);
    let cmdline = fs::read_to_string(build.join("multibug.b/CMDLINE.tmp")).unwrap();
    assert!(cmdline.contains("input.c"));
    assert!(cmdline.contains("input_2.h"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interrupt_abandons_the_run() {
    let (_tmp, ctags, units, build) = tree();
    case(&units, "spin.i", "LOOP\n", None);
    case(&units, "parser.r/later.d", "int main() {}\n", None);

    let config = plain_run(&ctags, &units, &build, &["--with-timeout=30"]);
    let (tx, token) = CancelToken::new();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let _ = tx.send(true);
    });

    let begin = Instant::now();
    let res = executor::run_units(config, token).await;
    assert!(matches!(res, Err(UnitsError::Interrupted)), "{:?}", res);
    assert!(begin.elapsed() < Duration::from_secs(10));
    assert!(!build.join("parser.r/later.d").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn memory_checker_wraps_the_subject() {
    let (_tmp, ctags, units, build) = tree();
    case(&units, "leak.d", "LEAK\n", Some(("expected.tags", EXPECTED)));
    case(&units, "clean.v", "int main() {}\n", Some(("expected.tags", EXPECTED)));
    // Takes longer than the plain deadline but fits the stretched one.
    case(&units, "slow.d", "SLOW\n", Some(("expected.tags", EXPECTED)));
    case(&units, "leaky.v", "LEAK\n", Some(("expected.tags", EXPECTED)));

    let config = plain_run(
        &ctags,
        &units,
        &build,
        &["--with-valgrind", "--with-timeout=1", "--units=leak,clean,slow"],
    );
    // A memory error outside a memory-check case does not fail the run.
    assert_eq!(run(config).await.unwrap(), 0);
    assert!(result(&build, "leak.d").contains("failed (valgrind-error)"));
    let cmdline = fs::read_to_string(build.join("leak.d/CMDLINE.tmp")).unwrap();
    assert!(cmdline.starts_with("LC_ALL=C"));
    assert!(cmdline.contains("valgrind --leak-check=full --error-exitcode=58"));
    assert_eq!(result(&build, "clean.v"), "");
    assert_eq!(result(&build, "slow.d"), "");

    let config = plain_run(
        &ctags,
        &units,
        &build,
        &["--with-valgrind", "--units=leaky"],
    );
    assert_eq!(run(config).await.unwrap(), 1);
    assert!(result(&build, "leaky.v").contains("unexpected exit status: 58"));
}
