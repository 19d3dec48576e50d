//! Duplicate code detection.
//!
//! Blocks (functions, classes and significant control-flow statements) are
//! fingerprinted with a structural hash. Blocks sharing a hash across files
//! are exact duplicates; the remaining blocks are compared by token overlap
//! to find near duplicates. Free functions sharing a name but not a body are
//! reported separately.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use crate::config::{AnalysisDepth, DuplicateSettings};
use crate::syntax::fingerprint::{normalized_tokens, structural_hash};
use crate::syntax::{
    count_statements, extract_module_facts, walk, DeclarationKind, SyntaxNode,
    Visitor, Walk,
};

use super::{Analyzer, AnalyzerContext, AnalyzerOutput, Category, Finding, Severity};

const NAME: &str = "duplicates";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockKind {
    Function,
    Class,
    ControlBlock,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Function => "function",
            BlockKind::Class => "class",
            BlockKind::ControlBlock => "control block",
        }
    }
}

/// A fingerprinted region of one file.
#[derive(Debug, Clone)]
pub struct CodeBlock {
    /// Path relative to the project root.
    pub file_path: PathBuf,
    pub start_line: usize,
    pub end_line: usize,
    pub start_byte: usize,
    pub end_byte: usize,
    pub code_text: String,
    pub structural_hash: String,
    pub normalized_text: String,
    pub kind: BlockKind,
    pub name: String,
    tokens: HashSet<String>,
}

impl CodeBlock {
    fn location(&self) -> String {
        format!("{}:{}", self.file_path.display(), self.start_line)
    }

    /// Same file and byte range inside `outer`.
    fn is_within(&self, outer: &CodeBlock) -> bool {
        self.file_path == outer.file_path
            && self.start_byte >= outer.start_byte
            && self.end_byte <= outer.end_byte
    }

    fn overlaps(&self, other: &CodeBlock) -> bool {
        self.is_within(other) || other.is_within(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    Exact,
    Similar,
}

#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    pub blocks: Vec<CodeBlock>,
    /// 1.0 for exact groups; lowest linking similarity for similar groups.
    pub similarity_score: f64,
    pub kind: GroupKind,
}

impl DuplicateGroup {
    fn files(&self) -> BTreeSet<&Path> {
        self.blocks.iter().map(|b| b.file_path.as_path()).collect()
    }

    fn span(&self) -> usize {
        self.blocks
            .first()
            .map(|b| b.end_byte - b.start_byte)
            .unwrap_or(0)
    }
}

/// What the duplicate-name check knows about one function.
#[derive(Debug, Clone)]
pub struct FunctionSignature {
    pub name: String,
    pub parameters: Vec<String>,
    pub return_annotation: Option<String>,
    pub docstring: Option<String>,
    pub complexity_score: u32,
    pub body_hash: String,
    pub file_path: PathBuf,
    pub line: usize,
    /// Module-level function (not a method, not nested).
    pub top_level: bool,
}

struct BlockCollector<'a> {
    rel: &'a Path,
    settings: &'a DuplicateSettings,
    blocks: Vec<CodeBlock>,
}

impl BlockCollector<'_> {
    fn consider(&mut self, node: SyntaxNode<'_>, kind: BlockKind) {
        if count_statements(node) < self.settings.min_block_statements {
            return;
        }
        let name = match kind {
            BlockKind::ControlBlock => format!(
                "{} at line {}",
                node.ts_kind().trim_end_matches("_statement"),
                node.start_line()
            ),
            _ => node
                .field("name")
                .map(|n| n.text().to_string())
                .unwrap_or_default(),
        };
        let tokens = normalized_tokens(node);
        self.blocks.push(CodeBlock {
            file_path: self.rel.to_path_buf(),
            start_line: node.start_line(),
            end_line: node.end_line(),
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            code_text: node.text().to_string(),
            structural_hash: structural_hash(node),
            normalized_text: tokens.join(" "),
            kind,
            name,
            tokens: tokens.into_iter().collect(),
        });
    }

    fn consider_control(&mut self, node: SyntaxNode<'_>) {
        if self.settings.include_control_blocks && node.kind().is_control_block() {
            self.consider(node, BlockKind::ControlBlock);
        }
    }
}

impl<'t> Visitor<'t> for BlockCollector<'_> {
    fn visit_function(&mut self, node: SyntaxNode<'t>) -> Walk {
        self.consider(node, BlockKind::Function);
        Walk::Children
    }

    fn visit_class(&mut self, node: SyntaxNode<'t>) -> Walk {
        self.consider(node, BlockKind::Class);
        Walk::Children
    }

    fn visit_decision(&mut self, node: SyntaxNode<'t>) -> Walk {
        self.consider_control(node);
        Walk::Children
    }

    fn visit_try(&mut self, node: SyntaxNode<'t>) -> Walk {
        self.consider_control(node);
        Walk::Children
    }

    fn visit_with(&mut self, node: SyntaxNode<'t>) -> Walk {
        self.consider_control(node);
        Walk::Children
    }
}

pub struct DuplicateAnalyzer {
    ctx: AnalyzerContext,
}

impl DuplicateAnalyzer {
    pub fn new(ctx: AnalyzerContext) -> Self {
        Self { ctx }
    }

    /// Collect blocks and function signatures from every parseable file.
    fn collect(
        &self,
        files: &[PathBuf],
        output: &mut AnalyzerOutput,
    ) -> (Vec<CodeBlock>, Vec<FunctionSignature>) {
        let settings = &self.ctx.config.settings().duplicates;
        let mut blocks = Vec::new();
        let mut signatures = Vec::new();

        self.ctx.for_each_file(NAME, files, output, |path, _| {
            let parsed = self.ctx.cache.get_tree(path)?;
            let rel = self.ctx.relative(path);

            let mut collector = BlockCollector {
                rel: &rel,
                settings,
                blocks: Vec::new(),
            };
            walk(&mut collector, parsed.root());

            let facts = extract_module_facts(&parsed)?;
            let file_signatures = facts.callables().filter_map(|decl| {
                let body = decl.body.as_ref()?;
                Some(FunctionSignature {
                    name: decl.name.clone(),
                    parameters: decl.parameters.clone(),
                    return_annotation: decl.return_annotation.clone(),
                    docstring: decl.docstring.clone(),
                    complexity_score: body.control_flow.cyclomatic_complexity(),
                    body_hash: body.structural_hash.clone(),
                    file_path: rel.clone(),
                    line: decl.span.start_line,
                    top_level: decl.kind == DeclarationKind::Function && !decl.nested,
                })
            });

            blocks.extend(collector.blocks);
            signatures.extend(file_signatures);
            Ok(())
        });

        (blocks, signatures)
    }
}

/// Group blocks by structural hash; keep groups spanning two or more files.
pub fn exact_groups(blocks: &[CodeBlock]) -> Vec<DuplicateGroup> {
    let mut by_hash: BTreeMap<&str, Vec<&CodeBlock>> = BTreeMap::new();
    for block in blocks {
        by_hash
            .entry(block.structural_hash.as_str())
            .or_default()
            .push(block);
    }

    let groups: Vec<DuplicateGroup> = by_hash
        .into_values()
        .filter(|members| {
            let files: BTreeSet<_> = members.iter().map(|b| &b.file_path).collect();
            files.len() >= 2
        })
        .map(|members| DuplicateGroup {
            blocks: members.into_iter().cloned().collect(),
            similarity_score: 1.0,
            kind: GroupKind::Exact,
        })
        .collect();

    drop_nested_groups(groups)
}

/// Drop groups whose every block lies inside a block of a larger group.
fn drop_nested_groups(mut groups: Vec<DuplicateGroup>) -> Vec<DuplicateGroup> {
    groups.sort_by(|a, b| b.span().cmp(&a.span()));
    let mut kept: Vec<DuplicateGroup> = Vec::new();
    for group in groups {
        let covered = group.blocks.iter().all(|block| {
            kept.iter()
                .flat_map(|g| g.blocks.iter())
                .any(|outer| block.is_within(outer))
        });
        if !covered {
            kept.push(group);
        }
    }
    kept.sort_by(|a, b| {
        let ka = (&a.blocks[0].file_path, a.blocks[0].start_line);
        let kb = (&b.blocks[0].file_path, b.blocks[0].start_line);
        ka.cmp(&kb)
    });
    kept
}

/// Jaccard similarity of two token sets.
pub fn token_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = i;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[rb.max(ra)] = ra.min(rb);
        }
    }
}

/// Group blocks of the same kind whose token overlap reaches `threshold`.
pub fn similar_groups(blocks: &[CodeBlock], threshold: f64) -> Vec<DuplicateGroup> {
    let mut sets = DisjointSet::new(blocks.len());
    let mut lowest = vec![1.0_f64; blocks.len()];
    let mut linked = vec![false; blocks.len()];

    for i in 0..blocks.len() {
        for j in (i + 1)..blocks.len() {
            let (a, b) = (&blocks[i], &blocks[j]);
            if a.kind != b.kind || a.overlaps(b) {
                continue;
            }
            let (small, large) = if a.tokens.len() <= b.tokens.len() {
                (a.tokens.len(), b.tokens.len())
            } else {
                (b.tokens.len(), a.tokens.len())
            };
            // Jaccard can never exceed the size ratio.
            if large == 0 || (small as f64 / large as f64) < threshold {
                continue;
            }
            let score = token_similarity(&a.tokens, &b.tokens);
            if score >= threshold {
                sets.union(i, j);
                linked[i] = true;
                linked[j] = true;
                lowest[i] = lowest[i].min(score);
                lowest[j] = lowest[j].min(score);
            }
        }
    }

    let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in (0..blocks.len()).filter(|i| linked[*i]) {
        members.entry(sets.find(i)).or_default().push(i);
    }

    let groups = members
        .into_values()
        .filter(|idx| idx.len() >= 2)
        .map(|idx| DuplicateGroup {
            similarity_score: idx.iter().map(|i| lowest[*i]).fold(1.0, f64::min),
            blocks: idx.into_iter().map(|i| blocks[i].clone()).collect(),
            kind: GroupKind::Similar,
        })
        .collect();

    drop_nested_groups(groups)
}

/// Names shared by top-level functions whose bodies differ.
fn divergent_names(signatures: &[FunctionSignature]) -> Vec<(&str, Vec<&FunctionSignature>)> {
    let mut by_name: BTreeMap<&str, Vec<&FunctionSignature>> = BTreeMap::new();
    for sig in signatures.iter().filter(|s| s.top_level) {
        if sig.name.starts_with("__") && sig.name.ends_with("__") {
            continue;
        }
        by_name.entry(sig.name.as_str()).or_default().push(sig);
    }
    by_name
        .into_iter()
        .filter(|(_, sigs)| {
            let hashes: BTreeSet<_> = sigs.iter().map(|s| s.body_hash.as_str()).collect();
            hashes.len() >= 2
        })
        .collect()
}

fn locations(blocks: &[CodeBlock]) -> String {
    blocks
        .iter()
        .map(CodeBlock::location)
        .collect::<Vec<_>>()
        .join(", ")
}

impl Analyzer for DuplicateAnalyzer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn analyze(&self, files: &[PathBuf]) -> AnalyzerOutput {
        let mut output = AnalyzerOutput::new(NAME);
        let settings = &self.ctx.config.settings().duplicates;
        let (blocks, signatures) = self.collect(files, &mut output);

        let exact = exact_groups(&blocks);
        let claimed: Vec<&CodeBlock> = exact.iter().flat_map(|g| g.blocks.iter()).collect();
        for group in &exact {
            let first = &group.blocks[0];
            let files = group.files();
            output.findings.push(
                Finding::new(
                    Category::ExactDuplicate,
                    Severity::High,
                    &first.file_path,
                    format!(
                        "identical {} `{}` appears {} times across {} files: {}",
                        first.kind.as_str(),
                        first.name,
                        group.blocks.len(),
                        files.len(),
                        locations(&group.blocks)
                    ),
                )
                .at_line(first.start_line)
                .recommend("Keep one copy and call it from the other locations")
                .with_metric(1.0),
            );
            output.findings.push(
                Finding::new(
                    Category::RefactoringOpportunity,
                    Severity::Low,
                    &first.file_path,
                    format!(
                        "`{}` is duplicated in {}; extract it into a shared module",
                        first.name,
                        files
                            .iter()
                            .map(|p| p.display().to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                )
                .at_line(first.start_line)
                .recommend("Move the shared code into a common module and import it"),
            );
        }

        let similar = if self.ctx.config.depth() == AnalysisDepth::Quick {
            Vec::new()
        } else {
            let remaining: Vec<CodeBlock> = blocks
                .iter()
                .filter(|b| !claimed.iter().any(|c| b.is_within(c)))
                .cloned()
                .collect();
            similar_groups(&remaining, settings.similarity_threshold)
        };
        for group in &similar {
            let first = &group.blocks[0];
            output.findings.push(
                Finding::new(
                    Category::SimilarCode,
                    Severity::Medium,
                    &first.file_path,
                    format!(
                        "{} similar {} blocks ({:.0}% token overlap): {}",
                        group.blocks.len(),
                        first.kind.as_str(),
                        group.similarity_score * 100.0,
                        locations(&group.blocks)
                    ),
                )
                .at_line(first.start_line)
                .recommend("Factor the shared logic into a helper parameterized on the differences")
                .with_metric(group.similarity_score),
            );
        }

        for (name, sigs) in divergent_names(&signatures) {
            let first = sigs[0];
            let places = sigs
                .iter()
                .map(|s| format!("{}:{}", s.file_path.display(), s.line))
                .collect::<Vec<_>>()
                .join(", ");
            output.findings.push(
                Finding::new(
                    Category::DuplicateFunctionName,
                    Severity::Medium,
                    &first.file_path,
                    format!(
                        "function `{}` has {} diverging implementations: {}",
                        name,
                        sigs.len(),
                        places
                    ),
                )
                .at_line(first.line)
                .recommend("Rename the functions or consolidate them into one implementation"),
            );
        }

        let files_with_duplicates: BTreeSet<&Path> = exact
            .iter()
            .chain(similar.iter())
            .flat_map(|g| g.blocks.iter().map(|b| b.file_path.as_path()))
            .collect();
        output.set("total_code_blocks", blocks.len());
        output.set("total_functions", signatures.len());
        output.set("duplicate_groups", exact.len() + similar.len());
        output.set("exact_duplicates", exact.len());
        output.set(
            "similar_blocks",
            similar.iter().map(|g| g.blocks.len()).sum::<usize>(),
        );
        output.set("files_with_duplicates", files_with_duplicates.len());

        self.ctx.finish(output)
    }
}
