use std::collections::{HashMap, hash_map::Entry};

use crate::{
    backtest::data::Data,
    depth::{ApplySnapshot, INVALID_MAX, INVALID_MIN, L2MarketDepth, MarketDepth},
    types::{
        BUY_EVENT,
        DEPTH_SNAPSHOT_EVENT,
        EXCH_EVENT,
        Event,
        LOCAL_EVENT,
        SELL_EVENT,
        Side,
    },
};

/// A market depth implementation storing price levels in a hashmap, keyed by the price in
/// ticks. This is suited for assets whose tick size is very small relative to the price, which
/// would make an array-based representation prohibitively sparse.
#[derive(Debug)]
pub struct HashMapMarketDepth {
    pub tick_size: f64,
    pub lot_size: f64,
    pub timestamp: i64,
    pub ask_depth: HashMap<i64, f64>,
    pub bid_depth: HashMap<i64, f64>,
    pub best_bid_tick: i64,
    pub best_ask_tick: i64,
    pub low_bid_tick: i64,
    pub high_ask_tick: i64,
}

fn depth_below(depth: &HashMap<i64, f64>, start: i64, low: i64) -> i64 {
    let mut p = start - 1;
    while p >= low {
        if *depth.get(&p).unwrap_or(&0.0) > 0.0 {
            return p;
        }
        p -= 1;
    }
    INVALID_MIN
}

fn depth_above(depth: &HashMap<i64, f64>, start: i64, high: i64) -> i64 {
    let mut p = start + 1;
    while p <= high {
        if *depth.get(&p).unwrap_or(&0.0) > 0.0 {
            return p;
        }
        p += 1;
    }
    INVALID_MAX
}

impl HashMapMarketDepth {
    /// Constructs an instance of `HashMapMarketDepth`.
    pub fn new(tick_size: f64, lot_size: f64) -> Self {
        Self {
            tick_size,
            lot_size,
            timestamp: 0,
            ask_depth: HashMap::new(),
            bid_depth: HashMap::new(),
            best_bid_tick: INVALID_MIN,
            best_ask_tick: INVALID_MAX,
            low_bid_tick: INVALID_MAX,
            high_ask_tick: INVALID_MIN,
        }
    }
}

impl L2MarketDepth for HashMapMarketDepth {
    fn update_bid_depth(
        &mut self,
        price: f64,
        qty: f64,
        timestamp: i64,
    ) -> (i64, i64, i64, f64, f64, i64) {
        let price_tick = (price / self.tick_size).round() as i64;
        let qty_lot = (qty / self.lot_size).round() as i64;

        let prev_best_bid_tick = self.best_bid_tick;
        let prev_qty;
        match self.bid_depth.entry(price_tick) {
            Entry::Occupied(mut entry) => {
                prev_qty = *entry.get();
                if qty_lot > 0 {
                    *entry.get_mut() = qty;
                } else {
                    entry.remove();
                }
            }
            Entry::Vacant(entry) => {
                prev_qty = 0.0;
                if qty_lot > 0 {
                    entry.insert(qty);
                }
            }
        }

        if qty_lot == 0 {
            if price_tick == self.best_bid_tick {
                self.best_bid_tick =
                    depth_below(&self.bid_depth, self.best_bid_tick, self.low_bid_tick);
                if self.best_bid_tick == INVALID_MIN {
                    self.low_bid_tick = INVALID_MAX;
                }
            }
        } else {
            if price_tick > self.best_bid_tick {
                self.best_bid_tick = price_tick;
                if self.best_bid_tick >= self.best_ask_tick {
                    self.best_ask_tick =
                        depth_above(&self.ask_depth, self.best_bid_tick, self.high_ask_tick);
                }
            }
            self.low_bid_tick = self.low_bid_tick.min(price_tick);
        }

        self.timestamp = timestamp;

        (
            price_tick,
            prev_best_bid_tick,
            self.best_bid_tick,
            prev_qty,
            qty,
            timestamp,
        )
    }

    fn update_ask_depth(
        &mut self,
        price: f64,
        qty: f64,
        timestamp: i64,
    ) -> (i64, i64, i64, f64, f64, i64) {
        let price_tick = (price / self.tick_size).round() as i64;
        let qty_lot = (qty / self.lot_size).round() as i64;

        let prev_best_ask_tick = self.best_ask_tick;
        let prev_qty;
        match self.ask_depth.entry(price_tick) {
            Entry::Occupied(mut entry) => {
                prev_qty = *entry.get();
                if qty_lot > 0 {
                    *entry.get_mut() = qty;
                } else {
                    entry.remove();
                }
            }
            Entry::Vacant(entry) => {
                prev_qty = 0.0;
                if qty_lot > 0 {
                    entry.insert(qty);
                }
            }
        }

        if qty_lot == 0 {
            if price_tick == self.best_ask_tick {
                self.best_ask_tick =
                    depth_above(&self.ask_depth, self.best_ask_tick, self.high_ask_tick);
                if self.best_ask_tick == INVALID_MAX {
                    self.high_ask_tick = INVALID_MIN;
                }
            }
        } else {
            if price_tick < self.best_ask_tick {
                self.best_ask_tick = price_tick;
                if self.best_bid_tick >= self.best_ask_tick {
                    self.best_bid_tick =
                        depth_below(&self.bid_depth, self.best_ask_tick, self.low_bid_tick);
                }
            }
            self.high_ask_tick = self.high_ask_tick.max(price_tick);
        }

        self.timestamp = timestamp;

        (
            price_tick,
            prev_best_ask_tick,
            self.best_ask_tick,
            prev_qty,
            qty,
            timestamp,
        )
    }

    fn clear_depth(&mut self, side: Side, clear_upto_price: f64) {
        let clear_upto = (clear_upto_price / self.tick_size).round() as i64;
        match side {
            Side::Buy => {
                if self.best_bid_tick != INVALID_MIN {
                    for t in clear_upto..=self.best_bid_tick {
                        self.bid_depth.remove(&t);
                    }
                }
                self.best_bid_tick = depth_below(&self.bid_depth, clear_upto, self.low_bid_tick);
                if self.best_bid_tick == INVALID_MIN {
                    self.low_bid_tick = INVALID_MAX;
                }
            }
            Side::Sell => {
                if self.best_ask_tick != INVALID_MAX {
                    for t in self.best_ask_tick..=clear_upto {
                        self.ask_depth.remove(&t);
                    }
                }
                self.best_ask_tick = depth_above(&self.ask_depth, clear_upto, self.high_ask_tick);
                if self.best_ask_tick == INVALID_MAX {
                    self.high_ask_tick = INVALID_MIN;
                }
            }
            Side::None => {
                self.bid_depth.clear();
                self.ask_depth.clear();
                self.best_bid_tick = INVALID_MIN;
                self.best_ask_tick = INVALID_MAX;
                self.low_bid_tick = INVALID_MAX;
                self.high_ask_tick = INVALID_MIN;
            }
        }
    }
}

impl MarketDepth for HashMapMarketDepth {
    fn best_bid(&self) -> f64 {
        if self.best_bid_tick == INVALID_MIN {
            f64::NAN
        } else {
            self.best_bid_tick as f64 * self.tick_size
        }
    }

    fn best_ask(&self) -> f64 {
        if self.best_ask_tick == INVALID_MAX {
            f64::NAN
        } else {
            self.best_ask_tick as f64 * self.tick_size
        }
    }

    fn best_bid_tick(&self) -> i64 {
        self.best_bid_tick
    }

    fn best_ask_tick(&self) -> i64 {
        self.best_ask_tick
    }

    fn best_bid_qty(&self) -> f64 {
        *self.bid_depth.get(&self.best_bid_tick).unwrap_or(&0.0)
    }

    fn best_ask_qty(&self) -> f64 {
        *self.ask_depth.get(&self.best_ask_tick).unwrap_or(&0.0)
    }

    fn tick_size(&self) -> f64 {
        self.tick_size
    }

    fn lot_size(&self) -> f64 {
        self.lot_size
    }

    fn bid_qty_at_tick(&self, price_tick: i64) -> f64 {
        *self.bid_depth.get(&price_tick).unwrap_or(&0.0)
    }

    fn ask_qty_at_tick(&self, price_tick: i64) -> f64 {
        *self.ask_depth.get(&price_tick).unwrap_or(&0.0)
    }
}

impl ApplySnapshot for HashMapMarketDepth {
    fn apply_snapshot(&mut self, data: &Data<Event>) {
        self.bid_depth.clear();
        self.ask_depth.clear();
        self.best_bid_tick = INVALID_MIN;
        self.best_ask_tick = INVALID_MAX;
        self.low_bid_tick = INVALID_MAX;
        self.high_ask_tick = INVALID_MIN;

        for row_num in 0..data.len() {
            let event = &data[row_num];
            if event.is(BUY_EVENT) {
                let price_tick = (event.px / self.tick_size).round() as i64;
                if event.qty > 0.0 {
                    self.bid_depth.insert(price_tick, event.qty);
                    if price_tick > self.best_bid_tick {
                        self.best_bid_tick = price_tick;
                    }
                    if price_tick < self.low_bid_tick {
                        self.low_bid_tick = price_tick;
                    }
                }
            } else if event.is(SELL_EVENT) {
                let price_tick = (event.px / self.tick_size).round() as i64;
                if event.qty > 0.0 {
                    self.ask_depth.insert(price_tick, event.qty);
                    if price_tick < self.best_ask_tick {
                        self.best_ask_tick = price_tick;
                    }
                    if price_tick > self.high_ask_tick {
                        self.high_ask_tick = price_tick;
                    }
                }
            }
        }
    }

    fn snapshot(&self) -> Vec<Event> {
        let mut events = Vec::new();

        for (&price_tick, &qty) in self.bid_depth.iter() {
            if qty > 0.0 {
                events.push(Event {
                    ev: EXCH_EVENT | LOCAL_EVENT | BUY_EVENT | DEPTH_SNAPSHOT_EVENT,
                    exch_ts: 0,
                    local_ts: 0,
                    px: price_tick as f64 * self.tick_size,
                    qty,
                    order_id: 0,
                    ival: 0,
                    fval: 0.0,
                });
            }
        }
        for (&price_tick, &qty) in self.ask_depth.iter() {
            if qty > 0.0 {
                events.push(Event {
                    ev: EXCH_EVENT | LOCAL_EVENT | SELL_EVENT | DEPTH_SNAPSHOT_EVENT,
                    exch_ts: 0,
                    local_ts: 0,
                    px: price_tick as f64 * self.tick_size,
                    qty,
                    order_id: 0,
                    ival: 0,
                    fval: 0.0,
                });
            }
        }

        // todo: it's not a problem now, but it would be better to have valid timestamps.
        events.sort_unstable_by(|a, b| a.px.partial_cmp(&b.px).unwrap());
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_bid_depth() {
        let mut depth = HashMapMarketDepth::new(0.1, 1.0);

        let (price_tick, prev_best, best, prev_qty, qty, _) = depth.update_bid_depth(10.0, 5.0, 1);
        assert_eq!(price_tick, 100);
        assert_eq!(prev_best, INVALID_MIN);
        assert_eq!(best, 100);
        assert_eq!(prev_qty, 0.0);
        assert_eq!(qty, 5.0);
        assert_eq!(depth.best_bid(), 10.0);

        depth.update_bid_depth(10.1, 3.0, 2);
        assert_eq!(depth.best_bid_tick(), 101);

        let (_, prev_best, best, _, _, _) = depth.update_bid_depth(10.1, 0.0, 3);
        assert_eq!(prev_best, 101);
        assert_eq!(best, 100);
        assert_eq!(depth.best_bid_tick(), 100);
    }

    #[test]
    fn test_update_ask_depth() {
        let mut depth = HashMapMarketDepth::new(0.1, 1.0);

        depth.update_ask_depth(10.0, 5.0, 1);
        assert_eq!(depth.best_ask_tick(), 100);

        depth.update_ask_depth(9.9, 3.0, 2);
        assert_eq!(depth.best_ask_tick(), 99);

        depth.update_ask_depth(9.9, 0.0, 3);
        assert_eq!(depth.best_ask_tick(), 100);
    }

    #[test]
    fn test_clear_depth() {
        let mut depth = HashMapMarketDepth::new(0.1, 1.0);
        depth.update_bid_depth(10.0, 5.0, 1);
        depth.update_bid_depth(9.9, 5.0, 1);
        depth.update_ask_depth(10.1, 5.0, 1);
        depth.update_ask_depth(10.2, 5.0, 1);

        depth.clear_depth(Side::Buy, 0.0);
        assert_eq!(depth.best_bid_tick(), INVALID_MIN);
        assert_eq!(depth.best_ask_tick(), 101);

        depth.clear_depth(Side::Sell, 0.0);
        assert_eq!(depth.best_ask_tick(), INVALID_MAX);
    }

    #[test]
    fn test_apply_snapshot_and_snapshot_roundtrip() {
        let mut depth = HashMapMarketDepth::new(0.1, 1.0);
        depth.update_bid_depth(10.0, 5.0, 1);
        depth.update_ask_depth(10.1, 3.0, 1);

        let snap = depth.snapshot();
        assert_eq!(snap.len(), 2);

        let data = Data::from_data(&snap);
        let mut depth2 = HashMapMarketDepth::new(0.1, 1.0);
        depth2.apply_snapshot(&data);

        assert_eq!(depth2.best_bid(), 10.0);
        assert_eq!(depth2.best_ask(), 10.1);
    }
}
