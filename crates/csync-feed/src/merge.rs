//! Dataset merge engine.
//!
//! `merge` is the only way a [`Dataset`] changes. It never removes a time,
//! and it never trades a bar that carries indicator values for one that
//! does not.

use csync_core::{Dataset, LiveTick, Ohlc, Resolution, TimeSeriesPoint};
use std::collections::BTreeMap;

/// Combine `existing` with `incoming`, returning a new dataset.
///
/// For a shared `time`:
/// - incoming has indicator data, existing does not: incoming replaces it;
/// - both have indicator data: incoming OHLC plus the union of indicator
///   maps, incoming fields overriding per field;
/// - only existing has indicator data: existing is kept;
/// - neither has indicator data: incoming OHLC replaces existing.
///
/// Duplicate times inside `incoming` fold into each other with the same
/// rules, in batch order.
pub fn merge(existing: &Dataset, incoming: &[TimeSeriesPoint]) -> Dataset {
    let mut by_time: BTreeMap<i64, TimeSeriesPoint> =
        existing.iter().map(|p| (p.time, p.clone())).collect();

    for point in incoming {
        match by_time.get_mut(&point.time) {
            Some(current) => merge_point(current, point),
            None => {
                by_time.insert(point.time, point.clone());
            }
        }
    }

    by_time.into_values().collect()
}

fn merge_point(current: &mut TimeSeriesPoint, incoming: &TimeSeriesPoint) {
    match (current.has_indicator_data(), incoming.has_indicator_data()) {
        (false, true) => *current = incoming.clone(),
        (true, true) => {
            current.ohlc = incoming.ohlc.clone();
            for (id, fields) in &incoming.indicators {
                let slot = current.indicators.entry(id.clone()).or_default();
                for (field, value) in fields {
                    // A null never erases a computed value.
                    match (slot.get(field), value) {
                        (Some(Some(_)), None) => {}
                        _ => {
                            slot.insert(field.clone(), *value);
                        }
                    }
                }
            }
        }
        (true, false) => {}
        (false, false) => {
            current.ohlc = incoming.ohlc.clone();
            for (id, fields) in &incoming.indicators {
                current
                    .indicators
                    .entry(id.clone())
                    .or_default()
                    .extend(fields.iter().map(|(k, v)| (k.clone(), *v)));
            }
        }
    }
}

/// Outcome of folding a live tick against the current dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum TickFold {
    /// Updated copy of the bar the tick falls into.
    Update(TimeSeriesPoint),
    /// A new bar opened by the tick.
    NewBar(TimeSeriesPoint),
    /// Tick older than the last bar matching no existing bar.
    Stale,
}

impl TickFold {
    /// The single-point batch to hand to [`merge`], if any.
    pub fn into_point(self) -> Option<TimeSeriesPoint> {
        match self {
            Self::Update(point) | Self::NewBar(point) => Some(point),
            Self::Stale => None,
        }
    }
}

/// Build the one-point batch a live tick contributes.
///
/// The tick updates the bar at its exact time, or the last bar when it
/// falls inside that bar's interval. At or past the end of the last bar it
/// opens a new flat bar at the start of the interval holding the tick,
/// counted in whole resolutions from the last bar (from the epoch when the
/// dataset is empty). Indicators of an updated bar are carried over so the
/// merge keeps them.
pub fn fold_live_tick(dataset: &Dataset, tick: &LiveTick, resolution: Resolution) -> TickFold {
    if let Some(bar) = dataset.get(tick.time) {
        return TickFold::Update(apply(bar, tick));
    }

    let step = resolution.duration_secs().max(1);
    match dataset.last() {
        None => TickFold::NewBar(open_bar(tick, bar_start(tick.time, 0, step))),
        Some(last) if last.time.checked_add(step).is_some_and(|end| tick.time >= end) => {
            TickFold::NewBar(open_bar(tick, bar_start(tick.time, last.time, step)))
        }
        Some(last) if tick.time > last.time => TickFold::Update(apply(last, tick)),
        Some(_) => TickFold::Stale,
    }
}

/// Start of the `step`-wide interval containing `time`, on the grid through `anchor`.
fn bar_start(time: i64, anchor: i64, step: i64) -> i64 {
    let offset = time.saturating_sub(anchor).rem_euclid(step);
    time.saturating_sub(offset)
}

fn apply(bar: &TimeSeriesPoint, tick: &LiveTick) -> TimeSeriesPoint {
    let mut updated = bar.clone();
    updated.ohlc.apply_trade(tick.price, tick.volume);
    updated
}

fn open_bar(tick: &LiveTick, time: i64) -> TimeSeriesPoint {
    TimeSeriesPoint::new(
        time,
        Ohlc::flat(tick.price, tick.volume.unwrap_or_default()),
    )
}
