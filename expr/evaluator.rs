use ahash::{AHashMap, AHashSet};
use std::sync::{Arc, Weak};
use std::time::Instant;

use rayon::{ThreadPool, ThreadPoolBuilder};

use super::node::{ArrayExpr, Node, NodeId, Op};
use crate::error::EngineError;
use crate::linalg::{SvdFactors, product, svd, sweep};
use crate::model::{ArrayHandle, Catalog, Lifetime, MaterializedArray, Row, Schema};
use crate::ops::{aggregate, derive, filter, join, redimension, unpack};
use crate::shared::config::EngineConfig;

struct CachedArray {
    node: Weak<Node>,
    handle: ArrayHandle,
}

struct CachedFactors {
    node: Weak<Node>,
    factors: Arc<SvdFactors>,
}

/// Executes expression graphs against a catalog.
///
/// `materialize` realizes a node synchronously on the evaluator's worker
/// pool and memoizes the result by node identity, so asking again for the
/// same node returns the same handle. Intermediates computed along the way
/// live only for the duration of the request. Memoized results are scoped:
/// they are released explicitly, at the end of [`Evaluator::scope`], or by
/// [`Evaluator::collect_garbage`] once no expression refers to the node.
/// Only [`Evaluator::store`] writes to the catalog.
pub struct Evaluator {
    catalog: Arc<Catalog>,
    config: EngineConfig,
    pool: Arc<ThreadPool>,
    cache: AHashMap<NodeId, CachedArray>,
    factors: AHashMap<NodeId, CachedFactors>,
}

impl Evaluator {
    pub fn new(catalog: Arc<Catalog>, config: EngineConfig) -> Result<Self, EngineError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("genoarray-worker-{i}"))
            .build()
            .map_err(|e| EngineError::ThreadPool(e.to_string()))?;
        log::debug!("Evaluator started with {} workers", pool.current_num_threads());
        Ok(Self {
            catalog,
            config,
            pool: Arc::new(pool),
            cache: AHashMap::new(),
            factors: AHashMap::new(),
        })
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Leaf expression over a catalog array.
    pub fn scan(&self, name: &str) -> Result<ArrayExpr, EngineError> {
        self.catalog.lookup(name).map(ArrayExpr::scan)
    }

    /// Inferred schema; never touches data.
    pub fn schema<'a>(&self, expr: &'a ArrayExpr) -> &'a Schema {
        expr.schema()
    }

    pub fn is_materialized(&self, expr: &ArrayExpr) -> bool {
        matches!(expr.op(), Op::Scan(_)) || self.cache.contains_key(&expr.id())
    }

    /// Realizes `expr` and memoizes the result.
    pub fn materialize(&mut self, expr: &ArrayExpr) -> Result<ArrayHandle, EngineError> {
        if let Some(handle) = self.ready(expr) {
            return Ok(handle);
        }
        let array = self.run(expr)?;
        let handle = ArrayHandle::new(
            &format!("tmp-{}", expr.id()),
            Lifetime::Scoped,
            Arc::unwrap_or_clone(array),
        );
        self.cache.insert(
            expr.id(),
            CachedArray {
                node: Arc::downgrade(expr.node()),
                handle: handle.clone(),
            },
        );
        Ok(handle)
    }

    /// Realizes `expr` and registers it in the catalog under `name`.
    pub fn store(&mut self, expr: &ArrayExpr, name: &str) -> Result<ArrayHandle, EngineError> {
        if self.catalog.contains(name) {
            return Err(EngineError::NameCollision(name.to_string()));
        }
        let array = match self.ready(expr) {
            Some(handle) => handle.array().clone(),
            None => Arc::unwrap_or_clone(self.run(expr)?),
        };
        let handle = self.catalog.declare_array(name, array)?;
        log::info!("Stored {} ({} cells)", handle, handle.cell_count());
        Ok(handle)
    }

    /// Number of cells. Already realized nodes answer without evaluation;
    /// anything else is evaluated without being memoized.
    pub fn count(&mut self, expr: &ArrayExpr) -> Result<usize, EngineError> {
        match self.ready(expr) {
            Some(handle) => Ok(handle.cell_count()),
            None => Ok(self.run(expr)?.cell_count()),
        }
    }

    /// The first `n` cells in coordinate order.
    pub fn head(&mut self, expr: &ArrayExpr, n: usize) -> Result<Vec<Row>, EngineError> {
        let array = match self.ready(expr) {
            Some(handle) => handle.shared(),
            None => self.run(expr)?,
        };
        let mut rows = array.rows();
        rows.truncate(n);
        Ok(rows)
    }

    /// Forgets the memoized result of `expr`. Handles already given out stay valid.
    pub fn release(&mut self, expr: &ArrayExpr) -> bool {
        self.factors.remove(&expr.id());
        self.cache.remove(&expr.id()).is_some()
    }

    /// Drops memoized results whose expression nodes no longer exist.
    pub fn collect_garbage(&mut self) -> usize {
        let before = self.cache.len();
        self.cache.retain(|_, cached| cached.node.strong_count() > 0);
        self.factors.retain(|_, cached| cached.node.strong_count() > 0);
        let dropped = before - self.cache.len();
        if dropped > 0 {
            log::debug!("Released {dropped} unreachable intermediates");
        }
        dropped
    }

    /// Runs `body` and releases every result it memoized, whether it succeeds or not.
    pub fn scope<T>(&mut self, body: impl FnOnce(&mut Self) -> Result<T, EngineError>) -> Result<T, EngineError> {
        let before: AHashSet<NodeId> = self.cache.keys().copied().collect();
        let factors_before: AHashSet<NodeId> = self.factors.keys().copied().collect();
        let result = body(self);
        self.cache.retain(|id, _| before.contains(id));
        self.factors.retain(|id, _| factors_before.contains(id));
        result
    }

    fn ready(&self, expr: &ArrayExpr) -> Option<ArrayHandle> {
        match expr.op() {
            Op::Scan(handle) => Some(handle.clone()),
            _ => self.cache.get(&expr.id()).map(|c| c.handle.clone()),
        }
    }

    /// Evaluation order for `root`: inputs before consumers, each node once.
    /// Scans and memoized nodes are leaves.
    fn plan(&self, root: &ArrayExpr) -> Vec<ArrayExpr> {
        let mut order = Vec::new();
        let mut visited = AHashSet::new();
        let mut stack = vec![(root.clone(), false)];
        while let Some((expr, expanded)) = stack.pop() {
            if expanded {
                order.push(expr);
                continue;
            }
            if !visited.insert(expr.id()) {
                continue;
            }
            if self.ready(&expr).is_some() {
                order.push(expr);
                continue;
            }
            stack.push((expr.clone(), true));
            for input in expr.inputs().iter().rev() {
                stack.push((input.clone(), false));
            }
        }
        order
    }

    fn run(&mut self, root: &ArrayExpr) -> Result<Arc<MaterializedArray>, EngineError> {
        let plan = self.plan(root);
        let mut consumers: AHashMap<NodeId, usize> = AHashMap::new();
        for expr in &plan {
            if self.ready(expr).is_none() {
                for input in expr.inputs() {
                    *consumers.entry(input.id()).or_default() += 1;
                }
            }
        }
        let started = Instant::now();
        let pool = Arc::clone(&self.pool);
        let result = pool.install(|| self.run_plan(root, &plan, consumers));
        log::info!(
            "Materialized {} over {} nodes in {:.2?}",
            root.op().name(),
            plan.len(),
            started.elapsed()
        );
        result
    }

    fn run_plan(
        &mut self,
        root: &ArrayExpr,
        plan: &[ArrayExpr],
        mut consumers: AHashMap<NodeId, usize>,
    ) -> Result<Arc<MaterializedArray>, EngineError> {
        let mut results: AHashMap<NodeId, Arc<MaterializedArray>> = AHashMap::new();
        for expr in plan {
            let array = match self.ready(expr) {
                Some(handle) => handle.shared(),
                None => {
                    let inputs = expr
                        .inputs()
                        .iter()
                        .map(|input| {
                            results.get(&input.id()).cloned().ok_or_else(|| {
                                EngineError::schema(format!("input {} of {} was not evaluated", input.id(), expr.id()))
                            })
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    let started = Instant::now();
                    let out = self.execute(expr, &inputs)?;
                    log::debug!(
                        "{} {} produced {} cells in {} chunks ({:.2?})",
                        expr.id(),
                        expr.op().name(),
                        out.cell_count(),
                        out.chunk_count(),
                        started.elapsed()
                    );
                    for input in expr.inputs() {
                        if let Some(left) = consumers.get_mut(&input.id()) {
                            *left -= 1;
                            if *left == 0 {
                                results.remove(&input.id());
                            }
                        }
                    }
                    Arc::new(out)
                }
            };
            results.insert(expr.id(), array);
        }
        results
            .remove(&root.id())
            .ok_or_else(|| EngineError::schema(format!("{} was not evaluated", root.id())))
    }

    fn execute(&mut self, expr: &ArrayExpr, inputs: &[Arc<MaterializedArray>]) -> Result<MaterializedArray, EngineError> {
        let schema = expr.schema();
        match (expr.op(), inputs) {
            (Op::Scan(handle), []) => Ok(handle.array().clone()),
            (Op::Filter(predicate), [input]) => filter::execute(input, predicate, schema),
            (Op::Derive(specs), [input]) => derive::execute(input, specs, schema),
            (Op::Project(names), [input]) => derive::project(input, names, schema),
            (Op::RenameAttribute { .. } | Op::RenameDimension { .. }, [input]) => {
                Ok(input.with_schema(schema.clone()))
            }
            (Op::Join, [left, right]) => join::execute(left, right, schema),
            (Op::JoinOn { left: lk, right: rk }, [left, right]) => {
                join::execute_on_keys(left, right, lk, rk, self.config.shuffle_partitions, schema)
            }
            (Op::Merge, [left, right]) => join::merge(left, right, schema),
            (Op::Aggregate { aggregates, group_by }, [input]) => {
                aggregate::execute(input, aggregates, group_by, schema)
            }
            (Op::Redimension(spec), [input]) => redimension::execute(input, spec, schema),
            (Op::Unpack { .. }, [input]) => unpack::execute(input, schema),
            (Op::Sweep { axis, op }, [matrix, vector]) => sweep::execute(matrix, *axis, vector, *op, schema),
            (Op::Product(kind), [input]) => product::execute(input, *kind, schema),
            (Op::Svd(part), [input]) => {
                let factors = self.factors_for(&expr.inputs()[0], input)?;
                Ok(svd::extract(&factors, *part, schema))
            }
            (op, inputs) => Err(EngineError::schema(format!(
                "{} cannot take {} inputs",
                op.name(),
                inputs.len()
            ))),
        }
    }

    /// One decomposition per matrix node, shared by its `U`, `d` and `V` parts.
    fn factors_for(&mut self, matrix: &ArrayExpr, array: &MaterializedArray) -> Result<Arc<SvdFactors>, EngineError> {
        if let Some(cached) = self.factors.get(&matrix.id()) {
            return Ok(Arc::clone(&cached.factors));
        }
        let factors = Arc::new(SvdFactors::of_array(array)?);
        self.factors.insert(
            matrix.id(),
            CachedFactors {
                node: Arc::downgrade(matrix.node()),
                factors: Arc::clone(&factors),
            },
        );
        Ok(factors)
    }
}
