use crate::entry::Entry;
use crate::extract::{self, OutputMode};
use crate::resolve::Resolver;
use crate::selector::{ScopeCache, Selector};
use crate::walker::{EntrySink, ScanPlan, Traversal, Walker};
use anyhow::{Result, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::thread;

/// Totals reported after a run.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub entries: u64,
    pub matched: u64,
    pub warnings: u64,
}

impl Stats {
    fn merge(&mut self, other: Stats) {
        self.entries += other.entries;
        self.matched += other.matched;
        self.warnings += other.warnings;
    }
}

/// Diagnostic channel. Everything lands on stderr, never on stdout.
struct Diag {
    quiet: bool,
    verbose: u8,
    warnings: u64,
}

impl Diag {
    fn new(pipeline: &Pipeline) -> Self {
        Self {
            quiet: pipeline.quiet,
            verbose: pipeline.verbose,
            warnings: 0,
        }
    }

    fn warn(&mut self, message: String) {
        self.warnings += 1;
        if !self.quiet {
            eprintln!("WARN: {message}");
        }
    }

    fn info(&self, message: String) {
        if self.verbose > 0 && !self.quiet {
            eprintln!("INFO: {message}");
        }
    }
}

/// One invocation: enumerate, filter, extract, write.
pub struct Pipeline {
    pub selector: Selector,
    /// Name prefilter applied before content selectors, so one invocation
    /// covers the common name-then-content staging.
    pub prefilter: Option<Regex>,
    pub mode: OutputMode,
    pub walker: Walker,
    /// Worker pool size; 1 means a single sequential stream.
    pub parallel: usize,
    pub quiet: bool,
    pub verbose: u8,
}

impl Pipeline {
    /// Fresh traversal from a root path.
    pub fn run_root(&self, root: &Path, out: &mut dyn Write) -> Result<Stats> {
        let progress = self.progress_bar();
        let mut plan_diag = Diag::new(self);
        let plan = self.walker.plan(root, &mut |m| plan_diag.warn(m))?;

        let mut stats = if self.parallel > 1 && plan.units.len() > 1 {
            self.run_parallel(&plan, out, &progress)?
        } else {
            let mut sink = DriverSink::new(self, out, &progress);
            for unit in &plan.units {
                self.walker.walk_unit(unit, plan.root_scope.as_ref(), &mut sink)?;
            }
            sink.finish()
        };
        stats.warnings += plan_diag.warnings;
        progress.finish_and_clear();
        Ok(stats)
    }

    /// Chained mode: newline-delimited identifiers on stdin, re-resolved
    /// individually.
    pub fn run_stdin(&self, input: &mut dyn BufRead, out: &mut dyn Write) -> Result<Stats> {
        let progress = self.progress_bar();
        let resolver = Resolver {
            want_content: self.needs_content(),
            max_entry_bytes: self.walker.max_entry_bytes,
            sibling_target: self.walker.sibling_target.clone(),
        };
        let mut sink = DriverSink::new(self, out, &progress);
        for line in input.lines() {
            let line = line?;
            let id = line.trim();
            if id.is_empty() {
                continue;
            }
            let resolved = {
                let diag = &mut sink.diag;
                resolver.resolve(id, &mut |m| diag.warn(m))
            };
            match resolved {
                Ok(entry) => {
                    if self.admits(&entry) {
                        sink.entry(entry)?;
                    } else {
                        sink.info(format!("skipping {id} (traversal restriction)"));
                    }
                }
                Err(err) => sink.warn(format!("{id}: {err:#}")),
            }
        }
        let stats = sink.finish();
        progress.finish_and_clear();
        Ok(stats)
    }

    /// Traversal restrictions re-applied to re-resolved entries.
    fn admits(&self, entry: &Entry) -> bool {
        match self.walker.traversal {
            Traversal::All => true,
            Traversal::ZipOnly => entry.is_zip_member(),
            Traversal::FileOnly => !entry.is_zip_member(),
        }
    }

    fn needs_content(&self) -> bool {
        self.selector.needs_content() || matches!(self.mode, OutputMode::Excerpt(_))
    }

    /// Scan top-level units on a bounded pool. Each worker fills a private
    /// ordered buffer; buffers are concatenated in unit order, so the output
    /// is byte-identical to a sequential run.
    fn run_parallel(
        &self,
        plan: &ScanPlan,
        out: &mut dyn Write,
        progress: &ProgressBar,
    ) -> Result<Stats> {
        let workers = self.parallel.min(plan.units.len());
        let per_chunk = plan.units.len().div_ceil(workers);
        let chunks: Vec<&[PathBuf]> = plan.units.chunks(per_chunk).collect();

        let results: Vec<Result<(Vec<u8>, Stats)>> = thread::scope(|scope| {
            let handles: Vec<_> = chunks
                .iter()
                .map(|chunk| {
                    let chunk = *chunk;
                    scope.spawn(move || -> Result<(Vec<u8>, Stats)> {
                        let mut buffer = Vec::new();
                        let mut sink = DriverSink::new(self, &mut buffer, progress);
                        for unit in chunk {
                            self.walker.walk_unit(unit, plan.root_scope.as_ref(), &mut sink)?;
                        }
                        let stats = sink.finish();
                        Ok((buffer, stats))
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow!("scan worker panicked")))
                })
                .collect()
        });

        let mut total = Stats::default();
        for result in results {
            let (buffer, stats) = result?;
            out.write_all(&buffer)?;
            total.merge(stats);
        }
        Ok(total)
    }

    fn progress_bar(&self) -> ProgressBar {
        if self.quiet {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner} {wide_msg}") {
            bar.set_style(style);
        }
        bar
    }
}

/// Sink gluing the walker to selector evaluation and output rendering.
struct DriverSink<'a, W: Write + ?Sized> {
    pipeline: &'a Pipeline,
    out: &'a mut W,
    scopes: ScopeCache,
    diag: Diag,
    stats: Stats,
    progress: &'a ProgressBar,
}

impl<'a, W: Write + ?Sized> DriverSink<'a, W> {
    fn new(pipeline: &'a Pipeline, out: &'a mut W, progress: &'a ProgressBar) -> Self {
        Self {
            pipeline,
            out,
            scopes: ScopeCache::default(),
            diag: Diag::new(pipeline),
            stats: Stats::default(),
            progress,
        }
    }

    fn finish(self) -> Stats {
        let mut stats = self.stats;
        stats.warnings += self.diag.warnings;
        stats
    }
}

impl<W: Write + ?Sized> EntrySink for DriverSink<'_, W> {
    fn entry(&mut self, mut entry: Entry) -> Result<()> {
        self.stats.entries += 1;

        if let Some(prefilter) = &self.pipeline.prefilter
            && !prefilter.is_match(&entry.path)
        {
            self.diag.info(format!("skipping {}", entry.path));
            return Ok(());
        }

        let diag = &mut self.diag;
        let matched = self.pipeline.selector.evaluate(
            &mut entry,
            self.pipeline.walker.max_entry_bytes,
            &mut self.scopes,
            &mut |m| diag.warn(m),
        );
        if !matched.is_hit() {
            return Ok(());
        }

        match extract::format_match(
            &mut entry,
            &matched,
            &self.pipeline.mode,
            self.pipeline.walker.max_entry_bytes,
        ) {
            Ok(Some(line)) => {
                self.stats.matched += 1;
                // One write per unit; an aborted run never leaves a torn line.
                let mut unit = line;
                unit.push('\n');
                self.out.write_all(unit.as_bytes())?;
            }
            Ok(None) => self
                .diag
                .warn(format!("{}: no text available for excerpt", entry.path)),
            Err(err) => self.diag.warn(format!("{}: {err:#}", entry.path)),
        }
        Ok(())
    }

    fn warn(&mut self, message: String) {
        self.diag.warn(message);
    }

    fn info(&mut self, message: String) {
        self.diag.info(message);
    }

    fn container(&mut self, path: &str) {
        self.progress.set_message(format!("scanning {path}"));
        self.progress.tick();
    }
}
