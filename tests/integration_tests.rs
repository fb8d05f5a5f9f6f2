use chrono::{NaiveDate, TimeZone, Utc};
use startup_kpi_engine::*;

fn grid_from_csv(data: &str) -> anyhow::Result<Grid> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data.trim().as_bytes());

    let mut grid = Vec::new();
    for record in reader.records() {
        let record = record?;
        grid.push(record.iter().map(RawCell::from).collect());
    }
    Ok(grid)
}

fn d(y: i32, m: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, 1).unwrap()
}

fn run(input: &CompanyInput, hint: ColumnMappingHint) -> anyhow::Result<KpiSeries> {
    let interpreter = StaticInterpreter::new(hint);
    let pipeline = KpiPipeline::new(EngineConfig::default())?;
    let stamp = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    Ok(pipeline.run_at(input, &Collaborators::new(&interpreter), stamp)?)
}

fn runway_series(series: &KpiSeries) -> Vec<f64> {
    series
        .snapshots
        .iter()
        .filter_map(|s| s.value(FieldName::RunwayMonths))
        .collect()
}

#[test]
fn test_negative_number_formats() -> anyhow::Result<()> {
    let grid = grid_from_csv(
        r#"
"−8,000","(10,000)","8,000 -","€-1,234","(-500)","1,234.56"
"#,
    )?;
    let values: Vec<Option<f64>> = grid[0]
        .iter()
        .map(|cell| parse_cell(cell, PercentMode::Plain).map(|p| p.signed_value))
        .collect();

    assert_eq!(values[0], Some(-8_000.0));
    assert_eq!(values[1], Some(-10_000.0));
    assert_eq!(values[2], Some(-8_000.0));
    assert_eq!(values[3], Some(-1_234.0));
    assert_eq!(values[4], Some(-500.0));
    assert_eq!(values[5], Some(1_234.56));

    let parsed = parse_cell(&grid[0][1], PercentMode::Plain).unwrap();
    assert_eq!(parsed.magnitude, 10_000.0);
    assert_eq!(parsed.sign, Sign::Negative);
    Ok(())
}

#[test]
fn test_scenario_a_zero_burn_is_overridden() {
    let rows: Vec<PeriodRow> = [-80_000.0, -85_000.0, -90_000.0, -88_000.0]
        .iter()
        .enumerate()
        .map(|(i, ncf)| {
            PeriodRow::new(d(2024, i as u32 + 1))
                .with_value(FieldName::NetCashFlow, *ncf)
                .with_value(FieldName::BurnRate, 0.0)
        })
        .collect();

    let out = post_process(rows, &Evidence::default(), &EngineConfig::default());
    for (row, meta) in out.rows.iter().zip(&out.row_meta) {
        let burn = row.get(FieldName::BurnRate).unwrap();
        assert!(burn > 80_000.0 && burn < 90_000.0, "burn {}", burn);
        assert!(meta.field(FieldName::BurnRate).unwrap().is_proxy);
    }
}

#[test]
fn test_zero_burn_with_declining_cash_end_to_end() -> anyhow::Result<()> {
    let grid = grid_from_csv(
        r#"
Month,Burn,Cash
2024-01,0,"500,000"
2024-02,0,"450,000"
2024-03,0,"400,000"
"#,
    )?;
    let hint = ColumnMappingHint::new(0, Some(0))
        .with_claim(1, "burn_rate")
        .with_claim(2, "cash_balance");
    let series = run(&CompanyInput::new("declining", grid), hint)?;

    for snapshot in &series.snapshots {
        let burn = snapshot.kpi(FieldName::BurnRate).unwrap();
        assert_eq!(burn.value, Some(50_000.0));
        assert_eq!(burn.source, KpiSource::Computed);
        assert_eq!(burn.confidence, Some(Confidence::Medium));
    }
    assert_eq!(runway_series(&series), vec![10.0, 9.0, 8.0]);
    assert!(series.warnings.iter().any(|w| w.contains("declining")));
    Ok(())
}

#[test]
fn test_scenario_b_runway_capped_and_non_increasing() -> anyhow::Result<()> {
    let grid = grid_from_csv(
        r#"
Month,Cash,Runway
Jan 2024,"400,000",120
Feb 2024,"142,000",88
"#,
    )?;
    let hint = ColumnMappingHint::new(0, Some(0))
        .with_claim(1, "cash_balance")
        .with_claim(2, "runway_months");
    let series = run(&CompanyInput::new("runway", grid), hint)?;

    let runway = runway_series(&series);
    assert_eq!(runway.len(), 2);
    assert!(runway.iter().all(|r| *r <= 36.0));
    assert!(runway.windows(2).all(|pair| pair[1] <= pair[0]));

    let jan = series.meta(d(2024, 1)).unwrap();
    let runway_meta = jan.field(FieldName::RunwayMonths).unwrap();
    assert!(runway_meta.warnings.iter().any(|w| w.contains("capped")));
    Ok(())
}

#[test]
fn test_scenario_c_profitable_company_has_no_runway() -> anyhow::Result<()> {
    let grid = grid_from_csv(
        r#"
Month,Net cash flow,Cash
2024-05,"5,000","100,000"
"#,
    )?;
    let hint = ColumnMappingHint::new(0, Some(0))
        .with_claim(1, "net_cash_flow")
        .with_claim(2, "cash_balance");
    let series = run(&CompanyInput::new("profitable", grid), hint)?;

    let snapshot = series.latest().unwrap();
    assert_eq!(snapshot.value(FieldName::BurnRate), Some(0.0));
    assert_eq!(snapshot.value(FieldName::RunwayMonths), None);

    let json = serde_json::to_value(snapshot)?;
    assert_eq!(json["kpis"]["runway_months"]["status"], "not_applicable");
    assert_eq!(json["kpis"]["runway_months"]["value"], serde_json::Value::Null);
    assert!(json["kpis"].get("net_cash_flow").is_none());
    Ok(())
}

#[test]
fn test_scenario_d_duplicate_column_claim() -> anyhow::Result<()> {
    let grid = grid_from_csv(
        r#"
Month,Amount
2024-01,"12,000"
"#,
    )?;
    let hint = ColumnMappingHint::new(0, Some(0))
        .with_claim(1, "mrr")
        .with_claim(1, "burn_rate");

    let rows = map_columns(&grid, &hint);
    assert_eq!(rows.len(), 1);
    let populated: Vec<FieldName> = FieldName::ALL
        .iter()
        .copied()
        .filter(|f| rows[0].get(*f).is_some())
        .collect();
    assert_eq!(populated, vec![FieldName::Mrr]);
    Ok(())
}

#[test]
fn test_messy_export_with_bare_months() -> anyhow::Result<()> {
    let grid = grid_from_csv(
        r#"
Acme Corp monthly report,,,
,,,
Month (FY2024),MRR,Churn,Customers
Jan,"$10,000",2%,40
Feb,"$10,800",0.03,42
Total,"$20,800",,
"#,
    )?;
    let hint = ColumnMappingHint::new(2, Some(0))
        .with_claim(1, "mrr")
        .with_claim(2, "churn")
        .with_claim(3, "customers");
    let series = run(&CompanyInput::new("acme", grid), hint)?;

    assert_eq!(series.snapshots.len(), 2);
    let feb = series.snapshot(d(2024, 2)).unwrap();
    assert_eq!(feb.value(FieldName::Mrr), Some(10_800.0));
    assert_eq!(feb.value(FieldName::Churn), Some(3.0));
    assert_eq!(feb.value(FieldName::Arr), Some(129_600.0));
    assert_eq!(feb.arr_method, Some(ArrMethod::RunRate));
    let growth = feb.value(FieldName::MrrGrowthMom).unwrap();
    assert!((growth - 8.0).abs() < 1e-9);

    let churn_meta = series.meta(d(2024, 2)).unwrap().field(FieldName::Churn).unwrap();
    assert!(!churn_meta.is_proxy);
    assert_eq!(churn_meta.confidence, Confidence::Medium);
    Ok(())
}

#[test]
fn test_merge_round_trip() {
    let stamp = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let sheet = PeriodRow::new(d(2024, 4))
        .with_value(FieldName::Mrr, 20_000.0)
        .with_value(FieldName::BurnRate, 35_000.0)
        .with_value(FieldName::CashBalance, 700_000.0)
        .with_value(FieldName::Churn, 1.5)
        .with_value(FieldName::Customers, 80.0);
    let processor = ProcessorPeriod::new(d(2024, 4))
        .with_value(FieldName::Mrr, 21_000.0)
        .with_value(FieldName::Customers, 83.0)
        .with_value(FieldName::BurnRate, 1.0)
        .with_value(FieldName::Churn, 9.0);

    let merger = SourceMerger::new("acme", CollectionMethod::Billing, stamp);
    let sheet_only = merger.merge(d(2024, 4), Some(&sheet), None);
    let merged = merger.merge(d(2024, 4), Some(&sheet), Some(&processor));

    for field in FieldName::KPI_FIELDS {
        match field {
            FieldName::Mrr | FieldName::Customers => {
                assert_eq!(merged.value(field), processor.values.get(&field).copied());
                assert_eq!(
                    merged.kpi(field).unwrap().source,
                    KpiSource::PaymentProcessor
                );
            }
            _ => assert_eq!(merged.kpi(field), sheet_only.kpi(field), "{}", field),
        }
    }
}

#[test]
fn test_payments_method_and_manual_override() -> anyhow::Result<()> {
    let grid = grid_from_csv(
        r#"
Month,MRR,Net cash flow,Cash
2024-01,"9,500","(30,000)","600,000"
2024-02,"9,900","(32,000)","568,000"
"#,
    )?;
    let input = CompanyInput::new("acme", grid)
        .with_processor(
            CollectionMethod::Payments,
            vec![
                ProcessorPeriod::new(d(2024, 2))
                    .with_value(FieldName::Mrr, 12_000.0)
                    .with_value(FieldName::Customers, 31.0),
                ProcessorPeriod::new(d(2024, 3))
                    .with_value(FieldName::Mrr, 10_400.0)
                    .with_value(FieldName::Customers, 33.0),
            ],
        )
        .with_manual(vec![ManualEntry {
            period_date: d(2024, 2),
            field: FieldName::CashBalance,
            value: 570_000.0,
        }]);
    let hint = ColumnMappingHint::new(0, Some(0))
        .with_claim(1, "mrr")
        .with_claim(2, "net_cash_flow")
        .with_claim(3, "cash_balance");
    let series = run(&input, hint)?;

    assert_eq!(series.snapshots.len(), 3);

    let feb = series.snapshot(d(2024, 2)).unwrap();
    assert_eq!(feb.value(FieldName::Mrr), Some(9_900.0));
    assert_eq!(feb.kpi(FieldName::Mrr).unwrap().source, KpiSource::Sheet);
    assert_eq!(feb.value(FieldName::Customers), Some(31.0));
    let cash = feb.kpi(FieldName::CashBalance).unwrap();
    assert_eq!(cash.value, Some(570_000.0));
    assert_eq!(cash.source, KpiSource::Manual);

    let mar = series.snapshot(d(2024, 3)).unwrap();
    let mrr = mar.kpi(FieldName::Mrr).unwrap();
    assert_eq!(mrr.source, KpiSource::PaymentProcessor);
    assert_eq!(mrr.confidence, Some(Confidence::Medium));
    let growth = mar.value(FieldName::MrrGrowthMom).unwrap();
    assert!((growth - 5.05050505).abs() < 1e-6);
    Ok(())
}

#[test]
fn test_post_process_idempotent_on_pipeline_rows() {
    let rows = vec![
        PeriodRow::new(d(2024, 1))
            .with_value(FieldName::CashBalance, 300_000.0)
            .with_value(FieldName::BurnRate, 0.0)
            .with_value(FieldName::MrrGrowthMom, 30.0)
            .with_value(FieldName::Churn, 4.0),
        PeriodRow::new(d(2024, 2))
            .with_value(FieldName::NetCashFlow, -20_000.0)
            .with_value(FieldName::CashBalance, 280_000.0)
            .with_value(FieldName::RunwayMonths, 400.0)
            .with_value(FieldName::MrrGrowthMom, -10.0),
        PeriodRow::new(d(2024, 3))
            .with_value(FieldName::NetCashFlow, -25_000.0)
            .with_value(FieldName::BurnRate, 25_000.0)
            .with_value(FieldName::CashBalance, 255_000.0)
            .with_value(FieldName::RunwayMonths, 50.0),
    ];
    let evidence = Evidence::new(vec!["One-time setup fees".to_string()]);
    let config = EngineConfig::default();

    let first = post_process(rows, &evidence, &config);
    let second = post_process(first.rows.clone(), &evidence, &config);

    for (a, b) in first.rows.iter().zip(&second.rows) {
        for field in FieldName::ALL {
            assert_eq!(a.get(field), b.get(field), "{} {}", a.period_date, field);
        }
    }

    let runway: Vec<f64> = first
        .rows
        .iter()
        .filter_map(|r| r.get(FieldName::RunwayMonths))
        .collect();
    assert!(runway.iter().all(|r| *r <= 36.0));
    assert!(runway.windows(2).all(|pair| pair[1] <= pair[0]));

    for (before, after) in first.row_meta.iter().zip(&second.row_meta) {
        for (field, meta) in &before.fields {
            let growth_or_churn = matches!(field, FieldName::MrrGrowthMom | FieldName::Churn);
            if growth_or_churn {
                assert!(meta.confidence <= Confidence::Medium);
            }
            if let Some(later) = after.field(*field) {
                if growth_or_churn {
                    assert!(later.confidence <= Confidence::Medium);
                }
            }
        }
    }
}

#[test]
fn test_rejected_hint_becomes_warning() -> anyhow::Result<()> {
    let grid = grid_from_csv("Month,MRR\n2024-01,100")?;
    let input = CompanyInput::new("acme", grid).with_processor(
        CollectionMethod::Billing,
        vec![ProcessorPeriod::new(d(2024, 1)).with_value(FieldName::Mrr, 250.0)],
    );
    let series = run(&input, ColumnMappingHint::new(9, Some(0)).with_claim(1, "mrr"))?;

    assert_eq!(series.snapshots.len(), 1);
    assert_eq!(series.snapshots[0].value(FieldName::Mrr), Some(250.0));
    assert!(series.warnings.iter().any(|w| w.contains("header row")));
    Ok(())
}

#[test]
fn test_json_hint_round_trip_through_pipeline() -> anyhow::Result<()> {
    let grid = grid_from_csv(
        r#"
Month,Revenue,Cash in bank,Notes
Mar-24,"€12.500,00","€250.000,00",launch
Apr-24,"€13.000,00","€240.000,00",
"#,
    )?;
    let interpreter = JsonHintInterpreter::new(
        r#"{
            "header_row_index": 0,
            "month_column": 0,
            "1": "mrr",
            "2": "cash_balance",
            "3": "commentary",
            "mapping_rationale": ["Revenue is recurring subscription revenue"]
        }"#,
    );
    let pipeline = KpiPipeline::new(EngineConfig::default())?;
    let series = pipeline.run(
        &CompanyInput::new("eu-co", grid),
        &Collaborators::new(&interpreter),
    )?;

    assert_eq!(series.snapshots.len(), 2);
    let apr = series.snapshot(d(2024, 4)).unwrap();
    assert_eq!(apr.value(FieldName::Mrr), Some(13_000.0));
    assert_eq!(apr.value(FieldName::CashBalance), Some(240_000.0));
    assert!(series.warnings.iter().any(|w| w.contains("commentary")));

    let schema = ColumnMappingHint::response_schema()?;
    assert!(schema["properties"].get("header_row_index").is_some());
    Ok(())
}

#[test]
fn test_run_many_independent_companies() -> anyhow::Result<()> {
    let hint = ColumnMappingHint::new(0, Some(0))
        .with_claim(1, "mrr")
        .with_claim(2, "net_cash_flow")
        .with_claim(3, "cash_balance");
    let interpreter = StaticInterpreter::new(hint);

    let inputs = vec![
        CompanyInput::new(
            "burning",
            grid_from_csv("Month,MRR,NCF,Cash\n2024-01,1000,-5000,50000")?,
        ),
        CompanyInput::new(
            "profitable",
            grid_from_csv("Month,MRR,NCF,Cash\n2024-01,9000,4000,50000")?,
        ),
        CompanyInput::new("empty", Vec::new()),
    ];

    let pipeline = KpiPipeline::new(EngineConfig::default())?;
    let results = pipeline.run_many(&inputs, &Collaborators::new(&interpreter));
    assert_eq!(results.len(), 3);

    let burning = results[0].as_ref().unwrap();
    assert_eq!(burning.latest().unwrap().value(FieldName::RunwayMonths), Some(10.0));

    let profitable = results[1].as_ref().unwrap();
    let runway = profitable.latest().unwrap().kpi(FieldName::RunwayMonths).unwrap();
    assert_eq!(runway.status, Some(KpiStatus::NotApplicable));

    let empty = results[2].as_ref().unwrap();
    assert!(empty.snapshots.is_empty());
    Ok(())
}

#[test]
fn test_config_from_json() -> anyhow::Result<()> {
    let config = EngineConfig::from_json_str(r#"{"sanity_runway_cap_months": 24}"#)?;
    assert_eq!(config.sanity_runway_cap_months, 24.0);
    assert_eq!(config.technical_runway_cap_months, 999.0);

    let bad = EngineConfig::from_json_str(r#"{"arr_observed_window": 0}"#);
    assert!(matches!(bad, Err(KpiEngineError::InvalidConfig(_))));
    Ok(())
}
