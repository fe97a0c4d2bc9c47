//! Units is a parallel conformance test runner for ctags.
//!
//! It runs a ctags-compatible binary (the *subject*) over a tree of small
//! test cases, normalizes what it prints and compares the result against a
//! golden file. Every case ends up with exactly one outcome, and the run
//! fails when any case fails in a way its class does not tolerate.
//!
//! ## Test Tree
//!
//! A case is a directory named `<name>.<class>` holding an `input.*` file
//! and, usually, an expected artifact:
//! ```text
//! Units/
//!   simple.d/
//!     input.c
//!     expected.tags
//!   parser-c.r/
//!     crash.b/
//!       input.c
//!       args.ctags
//!       features
//! ```
//! Directories named `<name>.r` are categories. Cases directly under the
//! root belong to the `ROOT` category.
//!
//! The class changes how a failure is read:
//!   - `d` (or `t`): a normal case, it must pass.
//!   - `b`: a known bug. Failing is tolerated; passing is reported as
//!     `FIXED`.
//!   - `i`: may loop forever. Skipped unless a timeout is given.
//!   - `v`: expected to upset the memory checker.
//!
//! The expected artifact selects the output format: `expected.tags`,
//! `expected.tags-e` (etags), `expected.tags-x` (xref) or
//! `expected.tags-json`. A case without one passes as long as the subject
//! exits cleanly.
//!
//! Optional siblings of the input:
//!   - `args.ctags`: extra options, checked with a dry run first.
//!   - `features`: one feature per line, `!name` for "must not have".
//!   - `languages`: parsers the subject must have.
//!   - `filter`: an executable run over the normalized output.
//!
//! ## Running
//!
//! ```bash
//! units run --ctags ./ctags --with-timeout 10 Units build
//! ```
//! runs every case with 4 workers and a 10 second deadline, writing work
//! files under `build/`. Each case prints one line:
//! ```text
//! Testing simple as C                                         passed
//! Testing crash as C                                          failed (KNOWN bug)
//! ```
//! followed by a summary grouped by outcome. Failed cases leave a
//! `CMDLINE.tmp` in their build directory that reproduces the run without
//! the harness.
//!
//! `units tmain Tmain build` runs the script-driven cases of a tmain tree
//! instead: each `<name>.d/run.sh` is executed and its exit status, output
//! and generated tags are compared against `*-expected.txt` files.
//!
//! ## Configuration
//!
//! A `units.toml` at the root of the test tree can set defaults:
//! ```toml
//! ctags = "/usr/local/bin/ctags"
//! threads = 8
//! timeout = 10
//! ```
//! Command line flags win over the file.
pub mod cli;
pub mod config;
pub mod errors;
pub mod executor;
pub mod normalize;
pub mod picker;
pub mod printer;
