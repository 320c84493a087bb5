//! Exchange rate resolution.
//!
//! A rate for (from, to) is looked up with successive strategies, first
//! success wins:
//!
//! 1. the stored rate from → to, unchanged;
//! 2. the stored rate to → from, inverted;
//! 3. a currency C both sides have a rate *to*: `rate(from → C) / rate(to → C)`;
//! 4. a currency C both sides have a rate *from*: `rate(C → to) / rate(C → from)`.
//!
//! Derived rates are rounded half-up to six fractional digits. When several
//! intermediates qualify, the lowest code is used.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use fxrates_common::{
    divide_rates, CurrencyCode, CurrencyPair, ExchangeRate, FxRatesError, Result, StorageError,
};
use fxrates_store::RateStore;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, instrument};

/// How a rate was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Stored rate for the pair itself.
    Direct,
    /// Reciprocal of the stored reverse rate.
    Inverse,
    /// Two rates into a shared target currency.
    CrossViaTarget,
    /// Two rates out of a shared base currency.
    CrossViaBase,
}

impl Strategy {
    /// Get a stable name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::Inverse => "inverse",
            Strategy::CrossViaTarget => "cross_via_target",
            Strategy::CrossViaBase => "cross_via_base",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A usable rate for a pair and how it was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedRate {
    pub pair: CurrencyPair,
    pub rate: Decimal,
    pub strategy: Strategy,
    /// Intermediate currency of a cross rate.
    pub via: Option<CurrencyCode>,
}

impl ResolvedRate {
    fn new(pair: &CurrencyPair, rate: Decimal, strategy: Strategy, via: Option<CurrencyCode>) -> Self {
        Self {
            pair: pair.clone(),
            rate,
            strategy,
            via,
        }
    }
}

/// Resolution counters.
#[derive(Debug, Default)]
struct ResolverMetrics {
    direct: AtomicU64,
    inverse: AtomicU64,
    cross_via_target: AtomicU64,
    cross_via_base: AtomicU64,
    not_found: AtomicU64,
}

impl ResolverMetrics {
    fn record(&self, strategy: Option<Strategy>) {
        let counter = match strategy {
            Some(Strategy::Direct) => &self.direct,
            Some(Strategy::Inverse) => &self.inverse,
            Some(Strategy::CrossViaTarget) => &self.cross_via_target,
            Some(Strategy::CrossViaBase) => &self.cross_via_base,
            None => &self.not_found,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time resolution counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolverStats {
    pub direct: u64,
    pub inverse: u64,
    pub cross_via_target: u64,
    pub cross_via_base: u64,
    pub not_found: u64,
}

impl ResolverStats {
    /// Total resolutions attempted.
    pub fn total(&self) -> u64 {
        self.direct + self.inverse + self.cross_via_target + self.cross_via_base + self.not_found
    }
}

/// Resolves rates against whatever store it is handed.
///
/// The resolver keeps no rates between calls; callers run one resolution per
/// unit of work so every lookup sees the same transaction.
#[derive(Debug, Default)]
pub struct RateResolver {
    metrics: ResolverMetrics,
}

impl RateResolver {
    /// Create a new resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a rate for `pair`, or fail with `RateNotFound`.
    #[instrument(skip(self, store), fields(pair = %pair))]
    pub async fn resolve<S>(&self, store: &mut S, pair: &CurrencyPair) -> Result<ResolvedRate>
    where
        S: RateStore + ?Sized,
    {
        let resolved = match self.cascade(store, pair).await? {
            Some(resolved) => resolved,
            None => {
                self.metrics.record(None);
                debug!("No strategy produced a rate");
                return Err(FxRatesError::RateNotFound(pair.clone()));
            }
        };

        self.metrics.record(Some(resolved.strategy));
        debug!(
            strategy = %resolved.strategy,
            via = resolved.via.as_ref().map(|c| c.as_str()),
            rate = %resolved.rate,
            "Rate resolved"
        );
        Ok(resolved)
    }

    /// Get resolution counts.
    pub fn stats(&self) -> ResolverStats {
        let m = &self.metrics;
        ResolverStats {
            direct: m.direct.load(Ordering::Relaxed),
            inverse: m.inverse.load(Ordering::Relaxed),
            cross_via_target: m.cross_via_target.load(Ordering::Relaxed),
            cross_via_base: m.cross_via_base.load(Ordering::Relaxed),
            not_found: m.not_found.load(Ordering::Relaxed),
        }
    }

    async fn cascade<S>(&self, store: &mut S, pair: &CurrencyPair) -> Result<Option<ResolvedRate>>
    where
        S: RateStore + ?Sized,
    {
        if let Some(found) = direct(store, pair).await? {
            return Ok(Some(found));
        }
        debug!(strategy = %Strategy::Direct, "Miss");

        // Past a direct hit, a same-code pair would only match itself as intermediate.
        if pair.base == pair.target {
            return Ok(None);
        }

        if let Some(found) = inverse(store, pair).await? {
            return Ok(Some(found));
        }
        debug!(strategy = %Strategy::Inverse, "Miss");

        if let Some(found) = cross_via_target(store, pair).await? {
            return Ok(Some(found));
        }
        debug!(strategy = %Strategy::CrossViaTarget, "Miss");

        cross_via_base(store, pair).await
    }
}

async fn direct<S>(store: &mut S, pair: &CurrencyPair) -> Result<Option<ResolvedRate>>
where
    S: RateStore + ?Sized,
{
    let found = store.find_rate(&pair.base, &pair.target).await?;
    Ok(found.map(|r| ResolvedRate::new(pair, r.rate, Strategy::Direct, None)))
}

async fn inverse<S>(store: &mut S, pair: &CurrencyPair) -> Result<Option<ResolvedRate>>
where
    S: RateStore + ?Sized,
{
    let Some(reverse) = store.find_rate(&pair.target, &pair.base).await? else {
        return Ok(None);
    };

    let rate = divide(Decimal::ONE, &reverse)?;
    Ok(Some(ResolvedRate::new(pair, rate, Strategy::Inverse, None)))
}

async fn cross_via_target<S>(store: &mut S, pair: &CurrencyPair) -> Result<Option<ResolvedRate>>
where
    S: RateStore + ?Sized,
{
    let from = by_code(store.find_rates_by_base(&pair.base).await?, |r| &r.target);
    if from.is_empty() {
        return Ok(None);
    }
    let to = by_code(store.find_rates_by_base(&pair.target).await?, |r| &r.target);

    let Some((via, from_rate, to_rate)) = shared(&from, &to) else {
        return Ok(None);
    };

    let rate = divide(from_rate.rate, to_rate)?;
    Ok(Some(ResolvedRate::new(pair, rate, Strategy::CrossViaTarget, Some(via))))
}

async fn cross_via_base<S>(store: &mut S, pair: &CurrencyPair) -> Result<Option<ResolvedRate>>
where
    S: RateStore + ?Sized,
{
    let from = by_code(store.find_rates_by_target(&pair.base).await?, |r| &r.base);
    if from.is_empty() {
        return Ok(None);
    }
    let to = by_code(store.find_rates_by_target(&pair.target).await?, |r| &r.base);

    let Some((via, from_rate, to_rate)) = shared(&from, &to) else {
        return Ok(None);
    };

    let rate = divide(to_rate.rate, from_rate)?;
    Ok(Some(ResolvedRate::new(pair, rate, Strategy::CrossViaBase, Some(via))))
}

/// Index rates by the currency on their far side.
fn by_code(
    rates: Vec<ExchangeRate>,
    side: impl Fn(&ExchangeRate) -> &fxrates_common::Currency,
) -> BTreeMap<CurrencyCode, ExchangeRate> {
    rates
        .into_iter()
        .map(|r| (side(&r).code.clone(), r))
        .collect()
}

/// Lowest code present in both maps, with its rate on each side.
fn shared<'a>(
    from: &'a BTreeMap<CurrencyCode, ExchangeRate>,
    to: &'a BTreeMap<CurrencyCode, ExchangeRate>,
) -> Option<(CurrencyCode, &'a ExchangeRate, &'a ExchangeRate)> {
    from.iter()
        .find_map(|(code, from_rate)| to.get(code).map(|to_rate| (code.clone(), from_rate, to_rate)))
}

fn divide(numerator: Decimal, denominator: &ExchangeRate) -> Result<Decimal> {
    divide_rates(numerator, denominator.rate).ok_or_else(|| {
        StorageError::MalformedRow(format!(
            "non-positive rate {} stored for {}",
            denominator.rate,
            denominator.pair()
        ))
        .into()
    })
}
