// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

//! Seeded sample data for the demo mode and for tests.

use crate::{Dataset, Store};
use anyhow::{Context, Result};
use celda_grid::{CellValue, FilterOption, Record};
use time::{Date, Duration, macros::date};

pub const DEMO_SEED: u64 = 2026;
pub const DEMO_ROWS: usize = 400;

const COMPANIES: [(&str, &str); 8] = [
    ("ACM", "Acme Press"),
    ("BRD", "Bridgeway Media"),
    ("CLR", "Clarion Group"),
    ("DUN", "Dunmore Publishing"),
    ("ELM", "Elmstead News"),
    ("FOX", "Foxglove Editorial"),
    ("GRN", "Greenhill Prints"),
    ("HRB", "Harbor Daily"),
];

const PRODUCTS: [&str; 10] = [
    "Morning Edition",
    "Evening Post",
    "Weekend Magazine",
    "Sports Weekly",
    "Business Review",
    "Travel Guide",
    "Home & Garden",
    "Kids Corner",
    "Science Today",
    "City Listings",
];

const CAMPAIGNS: [&str; 8] = [
    "Spring Launch",
    "Back to School",
    "Summer Reads",
    "Holiday Push",
    "Subscriber Drive",
    "Regional Expansion",
    "Brand Refresh",
    "Loyalty Week",
];

const CONCEPTS: [&str; 9] = [
    "Radio spots",
    "Billboards",
    "Social ads",
    "Printing",
    "Distribution",
    "Sponsorship",
    "Design agency",
    "Event booth",
    "Mailing",
];

const EPOCH: Date = date!(2024-01-01);

/// Same generator on every run for a given seed.
#[derive(Debug, Clone)]
struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);

        let mut x = self.state;
        x ^= x >> 13;
        x ^= x << 7;
        x ^= x >> 17;
        x
    }

    fn int_n(&mut self, n: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        (self.next_u64() % (n as u64)) as usize
    }

    fn bool(&mut self) -> bool {
        (self.next_u64() & 1) == 1
    }
}

/// Seeded generator for dataset rows.
pub struct RecordFaker {
    rng: DeterministicRng,
}

impl RecordFaker {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: DeterministicRng::new(seed),
        }
    }

    pub fn int_n(&mut self, n: usize) -> usize {
        self.rng.int_n(n)
    }

    pub fn date(&mut self) -> Date {
        EPOCH + Duration::days(self.rng.int_n(3 * 365) as i64)
    }

    pub fn circulation_record(&mut self, id: i64) -> Record {
        let (company, _) = COMPANIES[self.rng.int_n(COMPANIES.len())];
        let product = PRODUCTS[self.rng.int_n(PRODUCTS.len())];
        let date = self.date();
        let print_run = 1_000 + self.rng.int_n(49) as i64 * 500;
        let sold = self.rng.int_n(print_run as usize) as i64;
        let free = self.rng.int_n((print_run - sold) as usize / 4 + 1) as i64;
        let paid = sold - self.rng.int_n(sold as usize / 10 + 1) as i64;
        Record::new(id)
            .with("company", company)
            .with("product", product)
            .with("year", i64::from(date.year()))
            .with("month", i64::from(u8::from(date.month())))
            .with("date", date)
            .with("sold", sold)
            .with("free", free)
            .with("paid", paid)
            .with("print_run", print_run)
    }

    pub fn expense_record(&mut self, id: i64) -> Record {
        let campaign = CAMPAIGNS[self.rng.int_n(CAMPAIGNS.len())];
        let concept = CONCEPTS[self.rng.int_n(CONCEPTS.len())];
        let cents = 5_000 + self.rng.int_n(2_000_000) as i64;
        Record::new(id)
            .with("campaign", campaign)
            .with("concept", concept)
            .with("date", self.date())
            .with("amount", CellValue::Decimal(cents as f64 / 100.0))
            .with("paid", self.rng.bool())
    }

    pub fn circulation_records(&mut self, count: usize) -> Vec<Record> {
        (1..=count as i64)
            .map(|id| self.circulation_record(id))
            .collect()
    }

    pub fn expense_records(&mut self, count: usize) -> Vec<Record> {
        (1..=count as i64).map(|id| self.expense_record(id)).collect()
    }
}

/// Company catalog as picker options: name shown, code stored.
pub fn companies() -> Vec<FilterOption> {
    COMPANIES
        .iter()
        .map(|(code, name)| FilterOption::new(*name, *code))
        .collect()
}

pub fn products() -> &'static [&'static str] {
    &PRODUCTS
}

pub fn campaigns() -> &'static [&'static str] {
    &CAMPAIGNS
}

pub fn concepts() -> &'static [&'static str] {
    &CONCEPTS
}

impl Store {
    /// Fills every dataset with generated rows in one transaction.
    pub fn seed_demo_data(&self) -> Result<()> {
        let mut faker = RecordFaker::new(DEMO_SEED);
        let tx = self
            .raw_connection()
            .unchecked_transaction()
            .context("begin demo seed")?;
        for record in faker.circulation_records(DEMO_ROWS) {
            self.insert_record(Dataset::Circulation, &record)?;
        }
        for record in faker.expense_records(DEMO_ROWS) {
            self.insert_record(Dataset::Expenses, &record)?;
        }
        tx.commit().context("commit demo seed")?;
        log::info!("seeded {DEMO_ROWS} demo rows per dataset");
        Ok(())
    }
}
