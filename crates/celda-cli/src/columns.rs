// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::runtime::SharedStore;
use anyhow::Result;
use celda_db::{Dataset, demo};
use celda_grid::{
    CatalogCache, CellValue, ColumnDef, ColumnId, ColumnNode, FilterOption, FilterSpec,
    FilterValue, Grid, GridOptions, GridRow, OptionsContext, OptionsSource, Record, ValueKind,
    deletion_column, selection_column,
};
use std::sync::{Arc, PoisonError};

/// Reference lists behind the multi-select pickers, loaded from the store on
/// first use.
pub struct Catalogs {
    companies: Arc<CatalogCache<FilterOption>>,
    products: Arc<CatalogCache<(String, String)>>,
    campaigns: Arc<CatalogCache<String>>,
}

impl Catalogs {
    pub fn new(store: &SharedStore) -> Self {
        let companies = {
            let store = Arc::clone(store);
            CatalogCache::new("companies", move || {
                let codes = lock(&store).distinct_values(Dataset::Circulation, "company")?;
                Ok(company_options(&codes))
            })
        };
        let products = {
            let store = Arc::clone(store);
            CatalogCache::new("products", move || {
                lock(&store).distinct_pairs(Dataset::Circulation, "company", "product")
            })
        };
        let campaigns = {
            let store = Arc::clone(store);
            CatalogCache::new("campaigns", move || {
                lock(&store).distinct_values(Dataset::Expenses, "campaign")
            })
        };
        Self {
            companies: Arc::new(companies),
            products: Arc::new(products),
            campaigns: Arc::new(campaigns),
        }
    }
}

fn lock(store: &SharedStore) -> std::sync::MutexGuard<'_, celda_db::Store> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Known codes get the company name as label; unknown codes show as is.
fn company_options(codes: &[String]) -> Vec<FilterOption> {
    let named = demo::companies();
    codes
        .iter()
        .map(|code| {
            named
                .iter()
                .find(|option| &option.value == code)
                .cloned()
                .unwrap_or_else(|| FilterOption::new(code.clone(), code.clone()))
        })
        .collect()
}

fn loaded<T: Clone>(cache: &CatalogCache<T>) -> bool {
    match cache.ensure_loaded() {
        Ok(()) => true,
        Err(err) => {
            log::warn!("{err:#}");
            false
        }
    }
}

fn company_source(catalogs: &Catalogs) -> OptionsSource {
    let cache = Arc::clone(&catalogs.companies);
    OptionsSource::Loader(Arc::new(move |_: &OptionsContext<'_>| {
        if !loaded(&cache) {
            return Vec::new();
        }
        cache.options(|option| option.label.clone(), |option| option.value.clone())
    }))
}

/// Products sold by the companies picked in the company filter, or every
/// product when none is picked.
fn product_source(catalogs: &Catalogs) -> OptionsSource {
    let cache = Arc::clone(&catalogs.products);
    OptionsSource::Loader(Arc::new(move |context: &OptionsContext<'_>| {
        if !loaded(&cache) {
            return Vec::new();
        }
        let picked = match context.filter_value("company") {
            Some(FilterValue::Multi(codes)) if !codes.is_empty() => codes.clone(),
            _ => Vec::new(),
        };
        let mut products = cache
            .items()
            .into_iter()
            .filter(|(company, _)| picked.is_empty() || picked.contains(company))
            .map(|(_, product)| product)
            .collect::<Vec<_>>();
        products.sort();
        products.dedup();
        products
            .into_iter()
            .map(|product| FilterOption::new(product.clone(), product))
            .collect()
    }))
}

fn campaign_source(catalogs: &Catalogs) -> OptionsSource {
    let cache = Arc::clone(&catalogs.campaigns);
    OptionsSource::Loader(Arc::new(move |_: &OptionsContext<'_>| {
        if !loaded(&cache) {
            return Vec::new();
        }
        cache.options(String::clone, String::clone)
    }))
}

pub fn circulation_columns(catalogs: &Catalogs) -> Vec<ColumnNode> {
    vec![
        selection_column("Select").into(),
        ColumnDef::data("company", "Company", ValueKind::Text)
            .filter(FilterSpec::multi_select("companies", company_source(catalogs)).ordered(1))
            .into(),
        ColumnDef::data("product", "Product", ValueKind::Text)
            .width(180)
            .filter(FilterSpec::multi_select("products", product_source(catalogs)).ordered(2))
            .into(),
        ColumnNode::Group {
            title: "Period".to_owned(),
            columns: vec![
                ColumnDef::data("year", "Year", ValueKind::Int)
                    .width(60)
                    .filter(FilterSpec::text_param("year"))
                    .into(),
                ColumnDef::data("month", "Month", ValueKind::Int)
                    .width(60)
                    .into(),
                ColumnDef::data("date", "Date", ValueKind::Date)
                    .width(110)
                    .filter(FilterSpec::date_range("date_from", "date_to").labelled("Date range"))
                    .into(),
            ],
        },
        ColumnNode::Group {
            title: "Copies".to_owned(),
            columns: vec![
                ColumnDef::data("sold", "Sold", ValueKind::Int).width(80).editable().into(),
                ColumnDef::data("free", "Free", ValueKind::Int).width(80).editable().into(),
                ColumnDef::data("paid", "Paid", ValueKind::Int).width(80).editable().into(),
                ColumnDef::data("print_run", "Print run", ValueKind::Int)
                    .width(100)
                    .editable()
                    .create_only()
                    .into(),
            ],
        },
        deletion_column("Delete").into(),
    ]
}

pub fn expense_columns(catalogs: &Catalogs) -> Vec<ColumnNode> {
    vec![
        selection_column("Select").into(),
        ColumnDef::data("campaign", "Campaign", ValueKind::Text)
            .width(180)
            .filter(FilterSpec::multi_select("campaigns", campaign_source(catalogs)))
            .into(),
        ColumnDef::data("concept", "Concept", ValueKind::Text)
            .width(160)
            .editable()
            .filter(FilterSpec::text())
            .into(),
        ColumnDef::data("date", "Date", ValueKind::Date)
            .width(110)
            .editable()
            .filter(FilterSpec::date_range("date_from", "date_to"))
            .into(),
        ColumnDef::data("amount", "Amount", ValueKind::Decimal)
            .width(100)
            .editable()
            .into(),
        ColumnDef::data("paid", "Paid", ValueKind::Bool)
            .width(60)
            .editable()
            .filter(FilterSpec::boolean())
            .into(),
        deletion_column("Delete").into(),
    ]
}

/// Grid over one dataset. Paid expenses are closed: they can be read and
/// selected but not edited or deleted.
pub fn build_grid(dataset: Dataset, catalogs: &Catalogs, options: GridOptions) -> Grid<Record> {
    match dataset {
        Dataset::Circulation => Grid::new(circulation_columns(catalogs), options),
        Dataset::Expenses => Grid::new(expense_columns(catalogs), options)
            .with_editable(|row: &Record| !is_paid(row)),
    }
}

fn is_paid(row: &Record) -> bool {
    row.field(&ColumnId::from("paid")) == CellValue::Bool(true)
}

/// Warms every catalog so a broken store shows up at startup rather than in
/// the first picker.
pub fn preload(catalogs: &Catalogs) -> Result<()> {
    catalogs.companies.ensure_loaded()?;
    catalogs.products.ensure_loaded()?;
    catalogs.campaigns.ensure_loaded()?;
    Ok(())
}
