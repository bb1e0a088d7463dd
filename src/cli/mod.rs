pub mod build;
pub mod run;

use std::path::Path;
use std::process;

use rangec::ast::Program;
use rangec::config::Config;
use rangec::diagnostic::Diagnostic;

/// Read and decode the program at `input`, exiting on failure.
pub fn load_program(input: &Path) -> Program {
    let text = match std::fs::read_to_string(input) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", input.display(), e);
            process::exit(1);
        }
    };
    match rangec::parse_program(&text) {
        Ok(program) => program,
        Err(diag) => fail(&diag, None),
    }
}

/// An explicit `--config` wins; otherwise look for `rangec.toml` next to
/// the input and in its ancestors.
pub fn load_config(explicit: Option<&Path>, input: &Path) -> Config {
    let result = match explicit {
        Some(path) => Config::load(path),
        None => Config::discover(input.parent().unwrap_or(Path::new("."))),
    };
    match result {
        Ok(config) => config,
        Err(diag) => fail(&diag, None),
    }
}

/// Render `diag` and exit. Spans are shown against `source` when it can
/// be read.
pub fn fail(diag: &Diagnostic, source: Option<&Path>) -> ! {
    let text = source.and_then(|path| Some((path, std::fs::read_to_string(path).ok()?)));
    match text {
        Some((path, text)) if !diag.span.is_dummy() => {
            diag.render(&path.display().to_string(), &text);
        }
        _ => diag.render_plain(),
    }
    process::exit(1);
}
