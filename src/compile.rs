//! The staged compilation pipeline.
//!
//! Stages run behind strict barriers: no file starts stage S+1 until every
//! file finished stage S. Within a stage, per-file work items are bin-packed
//! into approximately equal-weight buckets by file size (oversized files get
//! their own bucket) and the buckets run on a `rayon` pool sized from
//! `-mt`. Workers accumulate diagnostics into their own containers which are
//! merged back into the master container on the main thread; a fatal error
//! ends the pipeline after the current stage.
//!
//! Preprocessing parallelizes only under `-fileunit`: with a shared
//! compilation unit, macro state must flow through the files in command-line
//! order.

use crate::{
    binder::ObjectBinder,
    cache,
    diagnostics::ErrorContainer,
    elaborator::{CompileDesign, Design},
    error::Result,
    fs::PathId,
    integrity::IntegrityChecker,
    library::{self, LibrarySet},
    node::FileContent,
    parser,
    preprocessor::{CompilationUnit, DefaultNettype, PreprocessResult, Preprocessor},
    splitter, Session,
};
use rayon::prelude::*;
use std::{path::PathBuf, time::Instant};

/// Everything a pipeline run produces.
#[derive(Debug)]
pub struct CompileOutput {
    pub errors: ErrorContainer,
    /// The elaborated design; absent under `-parseonly` or after a fatal
    /// error before stage 7.
    pub design: Option<Design>,
    /// Path of the written `.uhdm` file, when one was produced.
    pub uhdm_file: Option<PathBuf>,
}

impl CompileOutput {
    /// Process exit code: `0` iff the run carried no fatal error.
    pub fn exit_code(&self) -> i32 {
        i32::from(self.errors.has_fatal())
    }
}

/// Drives one compilation of a [`Session`]'s inputs.
pub struct Compiler<'a> {
    session: &'a Session,
}

impl<'a> Compiler<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// Runs the pipeline to completion (or to the first fatal barrier).
    pub fn compile(self) -> Result<CompileOutput> {
        let start = Instant::now();
        let mut errors = ErrorContainer::new();

        // stage 2: library resolution
        let libraries = library::resolve(
            &self.session.options,
            &self.session.fs,
            &self.session.symbols,
            &mut errors,
        )?;

        // stage 3: preprocess
        let preprocessed = self.preprocess(&libraries, &mut errors)?;
        if errors.has_fatal() {
            return Ok(CompileOutput { errors, design: None, uhdm_file: None });
        }
        // the binder consults the compilation unit's final net default
        let default_nettype =
            preprocessed.last().map(|(_, _, nettype)| *nettype).unwrap_or_default();

        // stages 4-6: split, parse, build trees
        let trees = self.parse(preprocessed, &mut errors);
        if errors.has_fatal() || self.session.options.parse_only {
            trace!("pipeline stopped after parsing in {:?}", start.elapsed());
            return Ok(CompileOutput { errors, design: None, uhdm_file: None });
        }

        // stages 7-8: compile and elaborate on the main thread; only file
        // contents were shared with workers, never the serializer
        let mut compiler =
            CompileDesign::new(&self.session.symbols, &self.session.options, &mut errors);
        compiler.compile(trees.into_iter().map(|(_, tree)| tree).collect());
        compiler.elaborate();
        let mut design = compiler.into_design();
        if errors.has_fatal() {
            return Ok(CompileOutput { errors, design: Some(design), uhdm_file: None });
        }

        // stage 9: bind references
        {
            let mut binder = ObjectBinder::new(
                &mut design,
                &self.session.symbols,
                &mut errors,
                default_nettype,
            );
            binder.bind();
        }

        // stage 10: integrity check
        IntegrityChecker::new(&design, &self.session.symbols, &mut errors).check();

        let uhdm_file = self.write_uhdm(&design)?;
        debug!("pipeline finished in {:?}", start.elapsed());
        Ok(CompileOutput { errors, design: Some(design), uhdm_file: Some(uhdm_file) })
    }

    // ---- stage 3 ---------------------------------------------------------

    fn preprocess(
        &self,
        libraries: &LibrarySet,
        errors: &mut ErrorContainer,
    ) -> Result<Vec<(PathId, PreprocessResult, DefaultNettype)>> {
        let session = self.session;
        let files: Vec<PathId> = libraries.work_files().to_vec();
        if files.is_empty() {
            return Err(crate::error::SvError::NoInput);
        }

        if session.options.file_unit {
            // each file owns a compilation unit, so files are independent
            let buckets = bin_pack(
                files.iter().map(|&f| (f, session.fs.file_size(f))).collect(),
                session.options.thread_count(),
            );
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(session.options.thread_count())
                .build()
                .expect("thread pool");
            let outcomes: Vec<
                Result<(Vec<(PathId, PreprocessResult, DefaultNettype)>, ErrorContainer)>,
            > = pool.install(|| {
                buckets
                    .into_par_iter()
                    .map(|bucket| {
                        let mut bucket_errors = ErrorContainer::new();
                        let mut results = Vec::new();
                        for file in bucket {
                            let mut unit = CompilationUnit::from_options(
                                &session.options,
                                &session.symbols,
                            );
                            let result =
                                preprocess_one(session, &mut unit, &mut bucket_errors, file)?;
                            results.push((file, result, unit.default_nettype));
                        }
                        Ok((results, bucket_errors))
                    })
                    .collect()
            });
            let mut results = Vec::new();
            for outcome in outcomes {
                let (bucket_results, bucket_errors) = outcome?;
                results.extend(bucket_results);
                errors.merge(bucket_errors);
            }
            // restore command-line order across buckets
            results.sort_by_key(|(file, _, _)| {
                files.iter().position(|f| f == file).unwrap_or(usize::MAX)
            });
            Ok(results)
        } else {
            // shared compilation unit: strictly sequential in input order
            let mut unit = CompilationUnit::from_options(&session.options, &session.symbols);
            let mut results = Vec::new();
            for file in files {
                let result = preprocess_one(session, &mut unit, errors, file)?;
                let nettype = unit.default_nettype;
                results.push((file, result, nettype));
            }
            Ok(results)
        }
    }

    // ---- stages 4-6 ------------------------------------------------------

    fn parse(
        &self,
        preprocessed: Vec<(PathId, PreprocessResult, DefaultNettype)>,
        errors: &mut ErrorContainer,
    ) -> Vec<(PathId, FileContent)> {
        let session = self.session;
        let weighted: Vec<((PathId, PreprocessResult, DefaultNettype), u64)> = preprocessed
            .into_iter()
            .map(|entry| {
                let weight = entry.1.text.len() as u64;
                (entry, weight)
            })
            .collect();
        let order: Vec<PathId> = weighted.iter().map(|((f, _, _), _)| *f).collect();
        let buckets = bin_pack(weighted, session.options.thread_count());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(session.options.thread_count())
            .build()
            .expect("thread pool");
        let outcomes: Vec<(Vec<(PathId, FileContent)>, ErrorContainer)> = pool.install(|| {
            buckets
                .into_par_iter()
                .map(|bucket| {
                    let mut bucket_errors = ErrorContainer::new();
                    let mut trees = Vec::new();
                    for (file, pp, _) in bucket {
                        let tree = parse_one(session, &mut bucket_errors, file, pp);
                        trees.push((file, tree));
                    }
                    (trees, bucket_errors)
                })
                .collect()
        });

        let mut trees = Vec::new();
        for (bucket_trees, bucket_errors) in outcomes {
            trees.extend(bucket_trees);
            errors.merge(bucket_errors);
        }
        trees.sort_by_key(|(file, _)| order.iter().position(|f| f == file).unwrap_or(usize::MAX));
        trees
    }

    // ---- output ----------------------------------------------------------

    fn write_uhdm(&self, design: &Design) -> Result<PathBuf> {
        let path = self.session.options.out_dir.join("design.uhdm");
        let contents = design.serializer.to_output(&self.session.fs, &self.session.symbols);
        let id = self.session.fs.to_path_id(&path);
        self.session.fs.write(id, &contents)?;
        Ok(path)
    }
}

fn preprocess_one(
    session: &Session,
    unit: &mut CompilationUnit,
    errors: &mut ErrorContainer,
    file: PathId,
) -> Result<PreprocessResult> {
    let source = session.fs.read_to_string(file)?;
    let ambient = unit.macro_signature(&session.symbols);
    if let Some((result, macros)) = cache::load_preprocess(
        &session.options,
        &session.fs,
        &session.symbols,
        file,
        &source,
        &ambient,
    ) {
        trace!("preprocess cache hit for {}", session.fs.leaf(file));
        unit.macros.extend(macros);
        return Ok(result);
    }
    let result = {
        let mut preprocessor =
            Preprocessor::new(&session.fs, &session.symbols, &session.options, unit, errors);
        preprocessor.preprocess(file)?
    };
    let _ = cache::store_preprocess(
        &session.options,
        &session.fs,
        &session.symbols,
        file,
        &source,
        &ambient,
        &result,
        &unit.macros,
    );
    Ok(result)
}

fn parse_one(
    session: &Session,
    errors: &mut ErrorContainer,
    file: PathId,
    pp: PreprocessResult,
) -> FileContent {
    if let Some(tree) =
        cache::load_parse(&session.options, &session.fs, &session.symbols, file, &pp.text)
    {
        trace!("parse cache hit for {}", session.fs.leaf(file));
        return tree;
    }

    let map = pp.location_map();
    let (mut tree, issues) = match splitter::split(
        &pp.text,
        session.options.split_threshold,
        session.options.thread_count(),
    ) {
        Some(chunks) => {
            trace!("split {} into {} chunks", session.fs.leaf(file), chunks.len());
            let mut parts = Vec::new();
            let mut issues = Vec::new();
            for chunk in &chunks {
                let (chunk_tree, mut chunk_issues) =
                    parser::parse_source(file, &chunk.text, &session.symbols);
                for issue in &mut chunk_issues {
                    issue.line += chunk.line_offset();
                }
                issues.extend(chunk_issues);
                parts.push((chunk_tree, chunk.line_offset()));
            }
            (splitter::stitch(file, parts), issues)
        }
        None => parser::parse_source(file, &pp.text, &session.symbols),
    };

    parser::report_issues(&issues, &pp.text, &map, &session.symbols, errors);
    parser::merge_sentinels(&mut tree, &pp.tree, &pp.sentinels);
    parser::remap_locations(&mut tree, &map);

    let _ = cache::store_parse(&session.options, &session.fs, &session.symbols, file, &pp.text, &tree);
    tree
}

/// Bin-packs weighted items into `n` approximately equal-weight buckets.
/// Items heavier than the per-bucket threshold each get their own bucket.
pub fn bin_pack<T>(items: Vec<(T, u64)>, n: usize) -> Vec<Vec<T>> {
    let n = n.max(1);
    let total: u64 = items.iter().map(|(_, w)| w).sum();
    let threshold = (total / n as u64).max(1);

    let mut buckets: Vec<(Vec<T>, u64)> = (0..n).map(|_| (Vec::new(), 0)).collect();
    let mut solo = Vec::new();
    let mut rest = Vec::new();
    for (item, weight) in items {
        if weight > threshold && total > weight {
            solo.push(vec![item]);
        } else {
            rest.push((item, weight));
        }
    }
    // heaviest first onto the least-loaded bucket
    rest.sort_by(|a, b| b.1.cmp(&a.1));
    for (item, weight) in rest {
        let target = buckets
            .iter_mut()
            .min_by_key(|(_, load)| *load)
            .expect("at least one bucket");
        target.0.push(item);
        target.1 += weight;
    }
    let mut result: Vec<Vec<T>> =
        buckets.into_iter().filter(|(b, _)| !b.is_empty()).map(|(b, _)| b).collect();
    result.extend(solo);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bin_pack_balances_weights() {
        let items: Vec<(u32, u64)> = (0..8).map(|i| (i, 10)).collect();
        let buckets = bin_pack(items, 4);
        assert_eq!(buckets.len(), 4);
        for bucket in &buckets {
            assert_eq!(bucket.len(), 2);
        }
    }

    #[test]
    fn bin_pack_isolates_oversized_items() {
        let mut items: Vec<(&str, u64)> = vec![("huge", 1000)];
        items.extend([("a", 10), ("b", 12), ("c", 9)]);
        let buckets = bin_pack(items, 3);
        let huge_bucket =
            buckets.iter().find(|b| b.contains(&"huge")).expect("oversized item kept");
        assert_eq!(huge_bucket.len(), 1);
    }

    #[test]
    fn bin_pack_single_bucket() {
        let items: Vec<(u32, u64)> = vec![(1, 5), (2, 5)];
        let buckets = bin_pack(items, 1);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].len(), 2);
    }
}
