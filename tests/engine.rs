use approx::assert_abs_diff_eq;
use genoarray::expr::{attr, lit};
use genoarray::linalg::{self, Absent, Axis, VALUE_ATTR, to_dense};
use genoarray::model::{ArrayBuilder, Attribute, Dimension, ScalarType, Schema, Value};
use genoarray::ops::{AggSpec, Combine, GroupBy, RedimensionSpec};
use genoarray::shared::EngineConfig;
use genoarray::{Catalog, EngineError, Evaluator};
use ndarray::{Array2, array};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;

fn evaluator(catalog: Catalog) -> Evaluator {
    let config = EngineConfig {
        workers: 2,
        ..EngineConfig::default()
    };
    Evaluator::new(Arc::new(catalog), config).unwrap()
}

fn matrix_schema(rows: usize, cols: usize, chunk: i64) -> Schema {
    Schema::new(
        vec![
            Dimension::new("row", 0, rows as i64 - 1, chunk),
            Dimension::new("col", 0, cols as i64 - 1, chunk),
        ],
        vec![Attribute::nullable("x", ScalarType::Float64)],
    )
    .unwrap()
}

fn declare_matrix(catalog: &Catalog, name: &str, values: &Array2<f64>, chunk: i64) {
    let schema = matrix_schema(values.nrows(), values.ncols(), chunk);
    catalog
        .declare_array(name, linalg::from_dense(values.view(), &schema).unwrap())
        .unwrap();
}

fn dense(ev: &mut Evaluator, expr: &genoarray::ArrayExpr) -> Array2<f64> {
    let handle = ev.materialize(expr).unwrap();
    to_dense(handle.array(), Absent::Nan).unwrap()
}

fn assert_matrix_eq(got: &Array2<f64>, want: &Array2<f64>) {
    assert_eq!(got.dim(), want.dim());
    for (g, w) in got.iter().zip(want.iter()) {
        assert_abs_diff_eq!(*g, *w, epsilon = 1e-9);
    }
}

fn random_matrix(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-1.0..1.0))
}

#[test]
fn centering_and_covariance_of_a_small_genotype_matrix() {
    let catalog = Catalog::new();
    declare_matrix(&catalog, "g", &array![[0., 2.], [1., 1.], [2., 0.]], 2);
    let mut ev = evaluator(catalog);
    let g = ev.scan("g").unwrap();

    let means = linalg::mean(&g, Axis::Columns).unwrap();
    let handle = ev.materialize(&means).unwrap();
    assert_eq!(handle.array().value(&[0], VALUE_ATTR), Some(&Value::Float(1.0)));
    assert_eq!(handle.array().value(&[1], VALUE_ATTR), Some(&Value::Float(1.0)));

    let centered = linalg::center(&g, Axis::Columns).unwrap();
    assert_matrix_eq(&dense(&mut ev, &centered), &array![[-1., 1.], [0., 0.], [1., -1.]]);

    let covariance = linalg::crossprod(&centered).unwrap();
    assert_matrix_eq(&dense(&mut ev, &covariance), &array![[1., -1.], [-1., 1.]]);
}

#[test]
fn tcrossprod_is_crossprod_of_the_transpose() {
    let catalog = Catalog::new();
    declare_matrix(&catalog, "m", &random_matrix(7, 4, 11), 3);
    let mut ev = evaluator(catalog);
    let m = ev.scan("m").unwrap();
    let transposed = m
        .redimension(
            RedimensionSpec::new()
                .dimension(Dimension::new("col", 0, 3, 3), "col")
                .dimension(Dimension::new("row", 0, 6, 3), "row")
                .attribute("x", Combine::First),
        )
        .unwrap();

    let direct = dense(&mut ev, &linalg::crossprod(&m).unwrap());
    let via_transpose = dense(&mut ev, &linalg::tcrossprod(&transposed).unwrap());
    assert_eq!(direct.dim(), (4, 4));
    assert_matrix_eq(&direct, &via_transpose);
}

#[test]
fn svd_factors_reconstruct_the_matrix() {
    let values = random_matrix(6, 4, 5);
    let catalog = Catalog::new();
    declare_matrix(&catalog, "m", &values, 4);
    let mut ev = evaluator(catalog);
    let factors = linalg::svd(&ev.scan("m").unwrap()).unwrap();

    let u = dense(&mut ev, &factors.u);
    let v = dense(&mut ev, &factors.v);
    let d_handle = ev.materialize(&factors.d).unwrap();
    let d: Vec<f64> = d_handle
        .rows()
        .iter()
        .map(|row| row.values[0].as_f64().unwrap())
        .collect();
    assert_eq!(d.len(), 4);
    assert!(d.windows(2).all(|pair| pair[0] >= pair[1]));

    let scaled = Array2::from_shape_fn(u.dim(), |(i, k)| u[[i, k]] * d[k]);
    assert_matrix_eq(&scaled.dot(&v.t()), &values);
}

#[test]
fn redimension_sum_agrees_with_grouped_aggregate() {
    let schema = Schema::new(
        vec![Dimension::new("i", 0, 99, 8)],
        vec![
            Attribute::required("k", ScalarType::Int64),
            Attribute::required("x", ScalarType::Int64),
        ],
    )
    .unwrap();
    let mut builder = ArrayBuilder::new(schema);
    let mut rng = StdRng::seed_from_u64(3);
    for i in 0..100 {
        builder
            .insert(vec![i], vec![Value::Int(rng.gen_range(0..5)), Value::Int(rng.gen_range(-10..10))])
            .unwrap();
    }
    let catalog = Catalog::new();
    catalog.declare_array("cells", builder.finish()).unwrap();
    let mut ev = evaluator(catalog);
    let cells = ev.scan("cells").unwrap();

    let grouped = cells
        .aggregate(vec![AggSpec::sum("x", "total")], GroupBy::attrs(&["k"]))
        .unwrap();
    let by_group: BTreeMap<i64, Value> = ev
        .materialize(&grouped)
        .unwrap()
        .rows()
        .into_iter()
        .map(|row| (row.values[0].as_i64().unwrap(), row.values[1].clone()))
        .collect();

    let reshaped = cells
        .redimension(
            RedimensionSpec::new()
                .dimension(Dimension::new("k", 0, 4, 5), "k")
                .attribute("x", Combine::Sum),
        )
        .unwrap();
    let by_dimension: BTreeMap<i64, Value> = ev
        .materialize(&reshaped)
        .unwrap()
        .rows()
        .into_iter()
        .map(|row| (row.coords[0], row.values[0].clone()))
        .collect();

    assert_eq!(by_group, by_dimension);
}

#[test]
fn out_of_range_coordinates_fail_the_whole_materialization() {
    let schema = Schema::new(
        vec![Dimension::new("i", 0, 9, 4)],
        vec![Attribute::required("slot", ScalarType::Int64)],
    )
    .unwrap();
    let mut builder = ArrayBuilder::new(schema);
    builder.insert(vec![0], vec![Value::Int(1)]).unwrap();
    builder.insert(vec![1], vec![Value::Int(5)]).unwrap();
    let catalog = Catalog::new();
    catalog.declare_array("a", builder.finish()).unwrap();
    let mut ev = evaluator(catalog);

    let expr = ev
        .scan("a")
        .unwrap()
        .redimension(
            RedimensionSpec::new()
                .dimension(Dimension::new("slot", 0, 1, 2), "slot")
                .attribute_from("position", "i", Combine::First),
        )
        .unwrap();
    match ev.materialize(&expr) {
        Err(EngineError::DimensionOverflow { coordinate, .. }) => assert_eq!(coordinate, 5),
        other => panic!("expected a dimension overflow, got {other:?}"),
    }
    assert!(!ev.is_materialized(&expr));
}

#[test]
fn materialization_is_idempotent_across_evaluators() {
    let catalog = Arc::new(Catalog::new());
    declare_matrix(&catalog, "m", &random_matrix(5, 5, 9), 2);
    let config = EngineConfig::default();
    let mut first = Evaluator::new(Arc::clone(&catalog), config.clone()).unwrap();
    let mut second = Evaluator::new(catalog, EngineConfig { workers: 1, ..config }).unwrap();

    let build = |ev: &Evaluator| {
        ev.scan("m")
            .unwrap()
            .derive_one("y", attr("x") / lit(0.5))
            .unwrap()
            .filter(attr("y").cmp_gt(lit(0.0)))
            .unwrap()
    };
    let a = build(&first);
    let once = first.materialize(&a).unwrap();
    let twice = first.materialize(&a).unwrap();
    assert!(once.same_as(&twice));

    let b = build(&second);
    let elsewhere = second.materialize(&b).unwrap();
    assert!(once.array().same_content(elsewhere.array()));
}

#[test]
fn catalog_round_trips_through_a_directory() {
    let schema = Schema::new(
        vec![Dimension::new("i", 0, 9, 3), Dimension::new("j", -2, 2, 2)],
        vec![
            Attribute::required("name", ScalarType::String),
            Attribute::nullable("score", ScalarType::Float64),
            Attribute::nullable("flag", ScalarType::Bool),
        ],
    )
    .unwrap();
    let mut builder = ArrayBuilder::new(schema);
    builder
        .insert(vec![0, -2], vec![Value::str("a b"), Value::Float(0.25), Value::Bool(true)])
        .unwrap();
    builder
        .insert(vec![7, 1], vec![Value::str("c"), Value::Null, Value::Null])
        .unwrap();
    let catalog = Catalog::new();
    catalog.declare_array("table", builder.finish()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    catalog.save(dir.path()).unwrap();
    let reopened = Catalog::open(dir.path()).unwrap();
    assert_eq!(reopened.names(), vec!["table".to_string()]);
    let original = catalog.lookup("table").unwrap();
    let restored = reopened.lookup("table").unwrap();
    assert_eq!(original.schema(), restored.schema());
    assert!(original.array().same_content(restored.array()));
}

#[test]
fn float_overflow_in_a_derived_attribute_materializes_as_null() {
    let schema = Schema::new(
        vec![Dimension::new("i", 0, 3, 2)],
        vec![Attribute::required("x", ScalarType::Float64)],
    )
    .unwrap();
    let mut builder = ArrayBuilder::new(schema);
    builder.insert(vec![0], vec![Value::Float(1e200)]).unwrap();
    builder.insert(vec![1], vec![Value::Float(3.0)]).unwrap();
    let catalog = Catalog::new();
    catalog.declare_array("a", builder.finish()).unwrap();
    let mut ev = evaluator(catalog);

    let squared = ev.scan("a").unwrap().derive_one("y", attr("x") * attr("x")).unwrap();
    let handle = ev.materialize(&squared).unwrap();
    let y = handle.schema().attribute("y").unwrap();
    assert!(y.nullable);
    assert_eq!(handle.array().value(&[0], "y"), Some(&Value::Null));
    assert_eq!(handle.array().value(&[1], "y"), Some(&Value::Float(9.0)));
}
