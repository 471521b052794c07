pub mod cli;
pub mod entry;
pub mod extract;
pub mod pipeline;
pub mod resolve;
pub mod selector;
pub mod walker;

pub use cli::{Cli, Commands, cli_parse};
pub use entry::{ContentStatus, Entry, ScopeDoc, ScopeResolution};
pub use extract::{
    ExcerptOptions, ExtractError, OutputMode, context_window, decode_window, encode_window,
};
pub use pipeline::{Pipeline, Stats};
pub use selector::{
    ContentSelector, JsonSelector, Match, NameSelector, Selector, SelectorError,
};
pub use walker::{ContentPolicy, EntrySink, Traversal, Walker};

use anyhow::Result;
use regex::Regex;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;

pub fn run() -> Result<()> {
    let cli = cli_parse();
    let pipeline = build_pipeline(&cli)?;
    let root = cli.command.root().to_string();

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let result = if root == "-" {
        let stdin = io::stdin();
        pipeline.run_stdin(&mut stdin.lock(), &mut out)
    } else {
        pipeline.run_root(Path::new(&root), &mut out)
    };

    let stats = match result {
        Ok(stats) => stats,
        // A closed reader downstream is a normal end of the run.
        Err(err) if is_broken_pipe(&err) => return Ok(()),
        Err(err) => return Err(err),
    };
    if let Err(err) = out.flush() {
        if err.kind() != io::ErrorKind::BrokenPipe {
            return Err(err.into());
        }
        return Ok(());
    }

    if cli.verbose > 0 && !cli.quiet {
        eprintln!(
            "INFO: {} entries scanned, {} matched, {} warning{}",
            stats.entries,
            stats.matched,
            stats.warnings,
            if stats.warnings == 1 { "" } else { "s" }
        );
    }
    Ok(())
}

/// Translate the parsed command line into one pipeline configuration.
/// Selector and excerpt options are compiled here, so a malformed pattern,
/// predicate or context count fails before any entry is visited.
fn build_pipeline(cli: &Cli) -> Result<Pipeline> {
    if cli.after < 0 {
        return Err(ExtractError::NegativeContext(cli.after).into());
    }

    let traversal = if cli.zip_only {
        Traversal::ZipOnly
    } else if cli.file_only {
        Traversal::FileOnly
    } else {
        Traversal::All
    };

    let (selector, prefilter, mode, content, sibling_target) = match &cli.command {
        Commands::Name {
            pattern,
            full_path,
            ignore_case,
            ..
        } => {
            let selector = Selector::Name(NameSelector::new(pattern, *full_path, *ignore_case)?);
            (selector, None, OutputMode::Files, ContentPolicy::None, None)
        }
        Commands::Regex {
            name_pattern,
            pattern,
            files,
            with_path,
            ..
        } => {
            let selector = Selector::Content(ContentSelector::new(pattern)?);
            let prefilter = Regex::new(name_pattern).map_err(SelectorError::from)?;
            let mode = if *files {
                OutputMode::Files
            } else {
                OutputMode::Excerpt(ExcerptOptions::new(
                    cli.after,
                    &cli.line_delimiter,
                    with_path.clone(),
                )?)
            };
            let capture = {
                let filter = prefilter.clone();
                ContentPolicy::Matching(Arc::new(move |path: &str| filter.is_match(path)))
            };
            (selector, Some(prefilter), mode, capture, None)
        }
        Commands::Jq {
            target,
            expr,
            files,
            ..
        } => {
            let selector = Selector::Json(JsonSelector::new(target, expr)?);
            let mode = if *files {
                OutputMode::Files
            } else {
                OutputMode::Excerpt(ExcerptOptions::new(cli.after, &cli.line_delimiter, None)?)
            };
            let capture = if matches!(mode, OutputMode::Excerpt(_)) {
                ContentPolicy::all()
            } else {
                ContentPolicy::None
            };
            (selector, None, mode, capture, Some(target.clone()))
        }
    };

    let walker = Walker {
        traversal,
        content,
        max_entry_bytes: cli.max_entry_bytes,
        sibling_target,
    };
    let parallel = match cli.parallel {
        None => 1,
        Some(0) => thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        Some(n) => n,
    };

    Ok(Pipeline {
        selector,
        prefilter,
        mode,
        walker,
        parallel,
        quiet: cli.quiet,
        verbose: cli.verbose,
    })
}

fn is_broken_pipe(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<io::Error>()
            .is_some_and(|io_err| io_err.kind() == io::ErrorKind::BrokenPipe)
    })
}
