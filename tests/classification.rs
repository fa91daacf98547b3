use anyhow::Result;
use ironload::*;
use std::sync::Arc;

#[macro_use]
mod macros;

fn delay_cuts() -> Result<CutPoints<String>> {
    Ok(CutPoints::new(
        vec![
            (0.0, "On-Time".to_string()),
            (60.0, "Slight Delay".to_string()),
            (180.0, "Major Delay".to_string()),
        ],
        "Critical Delay".to_string(),
    )?)
}

#[test]
fn static_bounds_are_inclusive_upper() -> Result<()> {
    let cuts = delay_cuts()?;
    assert_eq!(cuts.assign(0.0), "On-Time");
    assert_eq!(cuts.assign(60.0), "Slight Delay");
    assert_eq!(cuts.assign(60.01), "Major Delay");
    assert_eq!(cuts.assign(180.0), "Major Delay");
    assert_eq!(cuts.assign(500.0), "Critical Delay");
    assert_eq!(cuts.assign(-3.0), "On-Time");
    Ok(())
}

#[test]
fn cut_points_must_ascend() {
    assert!(CutPoints::new(vec![(10.0, "a"), (10.0, "b")], "c").is_err());
    assert!(CutPoints::new(vec![(10.0, "a"), (5.0, "b")], "c").is_err());
    assert!(CutPoints::new(vec![(f64::NAN, "a")], "c").is_err());
}

#[test]
fn percentile_interpolates_linearly() {
    let v = [10.0, 20.0, 30.0, 40.0, 50.0];
    assert_approx_eq!(percentile(&v, 0.33).unwrap(), 23.2);
    assert_approx_eq!(percentile(&v, 0.66).unwrap(), 36.4);
    assert_approx_eq!(percentile(&v, 0.5).unwrap(), 30.0);
    assert_eq!(percentile(&[7.0], 0.9), Some(7.0));
}

fn scores_schema() -> Result<Schema> {
    Ok(Schema::new(
        vec![
            ColumnDef::source("id", ColumnKind::Integer),
            ColumnDef::source("score", ColumnKind::Float).nullable(),
            ColumnDef::derived("band", ColumnKind::Category)
                .nullable()
                .with_domain(["Low Risk", "Moderate Risk", "High Risk"]),
        ],
        &["id"],
    )?)
}

fn enriched(schema: &Arc<Schema>, scores: &[Option<f64>]) -> Result<Vec<EnrichedRecord>> {
    let raw: Vec<RawRecord> = scores
        .iter()
        .enumerate()
        .map(|(i, s)| {
            RawRecord::new([
                ("id", RawValue::from(i as i64)),
                ("score", RawValue::from(*s)),
            ])
        })
        .collect();
    let cleaner = Cleaner::builder(Arc::clone(schema))
        .policy("id", ColumnPolicy::required(ColumnKind::Integer))
        .policy(
            "score",
            ColumnPolicy::required(ColumnKind::Float).on_missing(OnMissing::KeepNull),
        )
        .build()?;
    let deriver = FeatureDeriver::builder(Arc::clone(schema)).build()?;
    Ok(deriver.derive(cleaner.clean(&raw).records))
}

fn labels(schema: &Schema, records: &[EnrichedRecord]) -> Vec<String> {
    let band = schema.column("band").unwrap();
    records.iter().map(|r| r.get(band).render()).collect()
}

#[test]
fn percentile_tertiles_split_the_run() -> Result<()> {
    let schema = Arc::new(scores_schema()?);
    let mut records = enriched(
        &schema,
        &[Some(10.0), Some(20.0), Some(30.0), Some(40.0), Some(50.0)],
    )?;
    let classifier = Classifier::new(
        &schema,
        "score",
        "band",
        Banding::Percentile(PercentileBands::tertiles(["Low Risk", "Moderate Risk", "High Risk"])?),
    )?;
    let fitted = classifier.classify(&mut records);

    assert_eq!(
        labels(&schema, &records),
        ["Low Risk", "Low Risk", "Moderate Risk", "High Risk", "High Risk"]
    );
    assert_eq!(fitted.mode, "percentile");
    assert_eq!(fitted.bounds.len(), 2);
    assert_approx_eq!(fitted.bounds[0], 23.2);
    assert_approx_eq!(fitted.bounds[1], 36.4);
    Ok(())
}

#[test]
fn identical_values_collapse_to_the_lowest_band() -> Result<()> {
    let schema = Arc::new(scores_schema()?);
    let mut records = enriched(&schema, &[Some(5.0), Some(5.0), Some(5.0)])?;
    let classifier = Classifier::new(
        &schema,
        "score",
        "band",
        Banding::Percentile(PercentileBands::tertiles(["Low Risk", "Moderate Risk", "High Risk"])?),
    )?;
    let fitted = classifier.classify(&mut records);
    assert_eq!(fitted.bounds, vec![5.0]);
    assert!(labels(&schema, &records).iter().all(|l| l == "Low Risk"));
    Ok(())
}

#[test]
fn null_inputs_get_null_labels() -> Result<()> {
    let schema = Arc::new(scores_schema()?);
    let mut records = enriched(&schema, &[Some(150.0), None, Some(450.0)])?;
    let classifier = Classifier::new(
        &schema,
        "score",
        "band",
        Banding::fixed(vec![(200.0, "Low Risk"), (400.0, "Moderate Risk")], "High Risk")?,
    )?;
    let fitted = classifier.classify(&mut records);
    assert_eq!(labels(&schema, &records), ["Low Risk", "", "High Risk"]);
    assert_eq!(fitted.mode, "static");
    assert_eq!(fitted.bounds, vec![200.0, 400.0]);
    Ok(())
}

#[test]
fn labels_must_be_in_the_declared_domain() -> Result<()> {
    let schema = scores_schema()?;
    let err = Classifier::new(
        &schema,
        "score",
        "band",
        Banding::fixed(vec![(200.0, "Low Risk")], "Severe")?,
    )
    .unwrap_err();
    assert!(err.to_string().contains("Severe"));

    assert!(Classifier::new(&schema, "id", "score", Banding::fixed(vec![(1.0, "a")], "b")?).is_err());
    Ok(())
}
