use std::{cell::RefCell, cmp::Ordering, collections::{HashMap, HashSet}, rc::Rc};

use crate::{
    backtest::{
        assettype::AssetType,
        models::{FeeModel, LatencyModel, QueueModel},
        order::ExchToLocal,
        proc::Processor,
        state::State,
        BacktestError,
    },
    depth::{L2MarketDepth, MarketDepth, INVALID_MAX, INVALID_MIN},
    types::{
        Event,
        Order,
        OrderId,
        Side,
        Status,
        TimeInForce,
        EXCH_ASK_DEPTH_CLEAR_EVENT,
        EXCH_ASK_DEPTH_EVENT,
        EXCH_ASK_DEPTH_SNAPSHOT_EVENT,
        EXCH_BID_DEPTH_CLEAR_EVENT,
        EXCH_BID_DEPTH_EVENT,
        EXCH_BID_DEPTH_SNAPSHOT_EVENT,
        EXCH_BUY_TRADE_EVENT,
        EXCH_DEPTH_CLEAR_EVENT,
        EXCH_EVENT,
        EXCH_SELL_TRADE_EVENT,
    },
};

/// The exchange model with partial fills.
///
/// Supported order types: [`OrdType::Limit`](crate::types::OrdType::Limit),
/// [`OrdType::Market`](crate::types::OrdType::Market).
/// Supported time-in-force: [`TimeInForce::GTC`], [`TimeInForce::FOK`], [`TimeInForce::IOC`],
/// [`TimeInForce::GTX`].
///
/// **Conditions for full execution**
///
/// Buy order in the order book
///
/// - Your order price >= the best ask price
/// - Your order price > sell trade price
///
/// Sell order in the order book
///
/// - Your order price <= the best bid price
/// - Your order price < buy trade price
///
/// **Conditions for partial execution**
///
/// Buy order in the order book
///
/// - Filled by (remaining) sell trade quantity: your order is at the front of the queue and your
///   order price == sell trade price
///
/// Sell order in the order book
///
/// - Filled by (remaining) buy trade quantity: your order is at the front of the queue and your
///   order price == buy trade price
///
/// **Liquidity-taking order**
///
/// Liquidity-taking orders walk the displayed book level by level, consuming `leaves_qty` against
/// each level's quantity, even though the best price and quantity do not change as a result of
/// your own execution. Be aware that this may cause unrealistic fill simulations for orders that
/// are large relative to the book.
pub struct PartialFillExchange<AT, LM, QM, MD, FM>
where
    AT: AssetType,
    LM: LatencyModel,
    QM: QueueModel<MD>,
    MD: MarketDepth,
    FM: FeeModel,
{
    orders: Rc<RefCell<HashMap<OrderId, Order>>>,
    buy_orders: HashMap<i64, HashSet<OrderId>>,
    sell_orders: HashMap<i64, HashSet<OrderId>>,

    order_e2l: ExchToLocal<LM>,

    depth: MD,
    state: State<AT, FM>,
    queue_model: QM,

    filled_orders: Vec<OrderId>,
}

impl<AT, LM, QM, MD, FM> PartialFillExchange<AT, LM, QM, MD, FM>
where
    AT: AssetType,
    LM: LatencyModel,
    QM: QueueModel<MD>,
    MD: MarketDepth,
    FM: FeeModel,
{
    /// Constructs an instance of `PartialFillExchange`.
    pub fn new(
        depth: MD,
        state: State<AT, FM>,
        queue_model: QM,
        order_e2l: ExchToLocal<LM>,
    ) -> Self {
        Self {
            orders: Default::default(),
            buy_orders: Default::default(),
            sell_orders: Default::default(),
            order_e2l,
            depth,
            state,
            queue_model,
            filled_orders: Default::default(),
        }
    }

    fn process_recv_order_(
        &mut self,
        mut order: Order,
        recv_timestamp: i64,
    ) -> Result<(), BacktestError> {
        if order.req == Status::New {
            order.req = Status::None;
            self.ack_new(order, recv_timestamp)?;
        } else if order.req == Status::Canceled {
            order.req = Status::None;
            self.ack_cancel(order, recv_timestamp)?;
        } else if order.req == Status::Replaced {
            order.req = Status::None;
            self.ack_modify(order, recv_timestamp)?;
        } else {
            return Err(BacktestError::InvalidOrderRequest);
        }
        Ok(())
    }

    fn check_if_sell_filled(
        &mut self,
        order: &mut Order,
        price_tick: i64,
        qty: f64,
        timestamp: i64,
    ) -> Result<(), BacktestError> {
        match order.price_tick.cmp(&price_tick) {
            Ordering::Greater => {}
            Ordering::Less => {
                self.filled_orders.push(order.order_id);
                return self.fill(order, timestamp, true, order.price_tick, order.leaves_qty);
            }
            Ordering::Equal => {
                self.queue_model.trade(order, qty, &self.depth);
                let filled_qty = self.queue_model.is_filled(order, &self.depth);
                if filled_qty > 0.0 {
                    let exec_qty = filled_qty.min(qty).min(order.leaves_qty);
                    self.filled_orders.push(order.order_id);
                    return self.fill(order, timestamp, true, order.price_tick, exec_qty);
                }
            }
        }
        Ok(())
    }

    fn check_if_buy_filled(
        &mut self,
        order: &mut Order,
        price_tick: i64,
        qty: f64,
        timestamp: i64,
    ) -> Result<(), BacktestError> {
        match order.price_tick.cmp(&price_tick) {
            Ordering::Greater => {
                self.filled_orders.push(order.order_id);
                return self.fill(order, timestamp, true, order.price_tick, order.leaves_qty);
            }
            Ordering::Less => {}
            Ordering::Equal => {
                self.queue_model.trade(order, qty, &self.depth);
                let filled_qty = self.queue_model.is_filled(order, &self.depth);
                if filled_qty > 0.0 {
                    let exec_qty = filled_qty.min(qty).min(order.leaves_qty);
                    self.filled_orders.push(order.order_id);
                    return self.fill(order, timestamp, true, order.price_tick, exec_qty);
                }
            }
        }
        Ok(())
    }

    fn fill(
        &mut self,
        order: &mut Order,
        timestamp: i64,
        maker: bool,
        exec_price_tick: i64,
        exec_qty: f64,
    ) -> Result<(), BacktestError> {
        if order.status == Status::Expired
            || order.status == Status::Canceled
            || order.status == Status::Filled
        {
            return Err(BacktestError::InvalidOrderStatus);
        }

        order.maker = maker;
        if maker {
            order.exec_price_tick = order.price_tick;
        } else {
            order.exec_price_tick = exec_price_tick;
        }

        order.exec_qty = exec_qty;
        order.leaves_qty -= exec_qty;
        if (order.leaves_qty / self.depth.lot_size()).round() > 0.0 {
            order.status = Status::PartiallyFilled;
        } else {
            order.status = Status::Filled;
        }
        order.exch_timestamp = timestamp;
        let local_recv_timestamp = timestamp + self.order_e2l.response(timestamp, order);

        self.state.apply_fill(order);
        self.order_e2l.append(order.clone(), local_recv_timestamp);
        Ok(())
    }

    fn remove_filled_orders(&mut self) {
        if !self.filled_orders.is_empty() {
            let mut orders = self.orders.borrow_mut();
            for order_id in self.filled_orders.drain(..) {
                let order = orders.remove(&order_id).unwrap();
                if order.side == Side::Buy {
                    self.buy_orders.get_mut(&order.price_tick).unwrap().remove(&order_id);
                } else {
                    self.sell_orders.get_mut(&order.price_tick).unwrap().remove(&order_id);
                }
            }
        }
    }

    fn on_bid_qty_chg(&mut self, price_tick: i64, prev_qty: f64, new_qty: f64) {
        let orders = self.orders.clone();
        if let Some(order_ids) = self.buy_orders.get(&price_tick) {
            for order_id in order_ids.iter() {
                let mut orders_borrowed = orders.borrow_mut();
                let order = orders_borrowed.get_mut(order_id).unwrap();
                self.queue_model.depth(order, prev_qty, new_qty, &self.depth);
            }
        }
    }

    fn on_ask_qty_chg(&mut self, price_tick: i64, prev_qty: f64, new_qty: f64) {
        let orders = self.orders.clone();
        if let Some(order_ids) = self.sell_orders.get(&price_tick) {
            for order_id in order_ids.iter() {
                let mut orders_borrowed = orders.borrow_mut();
                let order = orders_borrowed.get_mut(order_id).unwrap();
                self.queue_model.depth(order, prev_qty, new_qty, &self.depth);
            }
        }
    }

    fn on_best_bid_update(
        &mut self,
        prev_best_tick: i64,
        new_best_tick: i64,
        timestamp: i64,
    ) -> Result<(), BacktestError> {
        {
            let orders = self.orders.clone();
            let mut orders_borrowed = orders.borrow_mut();
            if prev_best_tick == INVALID_MIN
                || (orders_borrowed.len() as i64) < new_best_tick - prev_best_tick
            {
                for (_, order) in orders_borrowed.iter_mut() {
                    if order.side == Side::Sell && order.price_tick <= new_best_tick {
                        self.filled_orders.push(order.order_id);
                        self.fill(order, timestamp, true, order.price_tick, order.leaves_qty)?;
                    }
                }
            } else {
                for t in (prev_best_tick + 1)..=new_best_tick {
                    if let Some(order_ids) = self.sell_orders.get(&t) {
                        for order_id in order_ids.clone().iter() {
                            self.filled_orders.push(*order_id);
                            let order = orders_borrowed.get_mut(order_id).unwrap();
                            self.fill(order, timestamp, true, order.price_tick, order.leaves_qty)?;
                        }
                    }
                }
            }
        }
        self.remove_filled_orders();
        Ok(())
    }

    fn on_best_ask_update(
        &mut self,
        prev_best_tick: i64,
        new_best_tick: i64,
        timestamp: i64,
    ) -> Result<(), BacktestError> {
        {
            let orders = self.orders.clone();
            let mut orders_borrowed = orders.borrow_mut();
            if prev_best_tick == INVALID_MAX
                || (orders_borrowed.len() as i64) < prev_best_tick - new_best_tick
            {
                for (_, order) in orders_borrowed.iter_mut() {
                    if order.side == Side::Buy && order.price_tick >= new_best_tick {
                        self.filled_orders.push(order.order_id);
                        self.fill(order, timestamp, true, order.price_tick, order.leaves_qty)?;
                    }
                }
            } else {
                for t in new_best_tick..prev_best_tick {
                    if let Some(order_ids) = self.buy_orders.get(&t) {
                        for order_id in order_ids.clone().iter() {
                            self.filled_orders.push(*order_id);
                            let order = orders_borrowed.get_mut(order_id).unwrap();
                            self.fill(order, timestamp, true, order.price_tick, order.leaves_qty)?;
                        }
                    }
                }
            }
        }
        self.remove_filled_orders();
        Ok(())
    }

    /// Walks the ask side of the book from the best ask up to and including `limit_tick`,
    /// filling `order` against each level's displayed quantity. Returns `true` if the order
    /// reached `Status::Filled` in the course of the walk.
    fn take_asks(
        &mut self,
        order: &mut Order,
        limit_tick: i64,
        timestamp: i64,
    ) -> Result<bool, BacktestError> {
        for t in self.depth.best_ask_tick()..=limit_tick {
            let qty = self.depth.ask_qty_at_tick(t);
            if qty > 0.0 {
                let exec_qty = qty.min(order.leaves_qty);
                self.fill(order, timestamp, false, t, exec_qty)?;
            }
            if order.status == Status::Filled {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Walks the bid side of the book from the best bid down to and including `limit_tick`,
    /// filling `order` against each level's displayed quantity. Returns `true` if the order
    /// reached `Status::Filled` in the course of the walk.
    fn take_bids(
        &mut self,
        order: &mut Order,
        limit_tick: i64,
        timestamp: i64,
    ) -> Result<bool, BacktestError> {
        for t in (limit_tick..=self.depth.best_bid_tick()).rev() {
            let qty = self.depth.bid_qty_at_tick(t);
            if qty > 0.0 {
                let exec_qty = qty.min(order.leaves_qty);
                self.fill(order, timestamp, false, t, exec_qty)?;
            }
            if order.status == Status::Filled {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn ack_new(&mut self, mut order: Order, timestamp: i64) -> Result<(), BacktestError> {
        if self.orders.borrow().contains_key(&order.order_id) {
            return Err(BacktestError::OrderIdExist);
        }

        if order.side == Side::Buy {
            if order.price_tick >= self.depth.best_ask_tick() {
                match order.time_in_force {
                    TimeInForce::GTX => {
                        order.status = Status::Expired;
                        order.exch_timestamp = timestamp;
                        let local_recv_timestamp = timestamp + self.order_e2l.response(timestamp, &order);
                        self.order_e2l.append(order.clone(), local_recv_timestamp);
                        Ok(())
                    }
                    TimeInForce::FOK => {
                        let mut cum_qty = 0.0;
                        let mut execute = false;
                        for t in self.depth.best_ask_tick()..=order.price_tick {
                            cum_qty += self.depth.ask_qty_at_tick(t);
                            if (cum_qty / self.depth.lot_size()).round()
                                >= (order.qty / self.depth.lot_size()).round()
                            {
                                execute = true;
                                break;
                            }
                        }
                        if execute {
                            self.take_asks(&mut order, order.price_tick, timestamp)?;
                            Ok(())
                        } else {
                            order.status = Status::Expired;
                            order.exch_timestamp = timestamp;
                            let local_recv_timestamp = timestamp + self.order_e2l.response(timestamp, &order);
                            self.order_e2l.append(order.clone(), local_recv_timestamp);
                            Ok(())
                        }
                    }
                    TimeInForce::IOC => {
                        if !self.take_asks(&mut order, order.price_tick, timestamp)? {
                            order.status = Status::Expired;
                            order.exch_timestamp = timestamp;
                            let local_recv_timestamp = timestamp + self.order_e2l.response(timestamp, &order);
                            self.order_e2l.append(order.clone(), local_recv_timestamp);
                        }
                        Ok(())
                    }
                    TimeInForce::GTC => {
                        if self.take_asks(&mut order, order.price_tick - 1, timestamp)? {
                            return Ok(());
                        }
                        // The buy order cannot remain in the ask book, since it cannot affect
                        // market depth during replay-based backtesting; the residual is force-
                        // filled at its own limit price.
                        let (price_tick, leaves_qty) = (order.price_tick, order.leaves_qty);
                        self.fill(&mut order, timestamp, false, price_tick, leaves_qty)
                    }
                }
            } else {
                self.queue_model.new_order(&mut order, &self.depth);
                order.status = Status::New;
                self.buy_orders.entry(order.price_tick).or_default().insert(order.order_id);

                order.exch_timestamp = timestamp;
                let local_recv_timestamp = timestamp + self.order_e2l.response(timestamp, &order);
                self.order_e2l.append(order.clone(), local_recv_timestamp);
                self.orders.borrow_mut().insert(order.order_id, order);
                Ok(())
            }
        } else if order.price_tick <= self.depth.best_bid_tick() {
            match order.time_in_force {
                TimeInForce::GTX => {
                    order.status = Status::Expired;
                    order.exch_timestamp = timestamp;
                    let local_recv_timestamp = timestamp + self.order_e2l.response(timestamp, &order);
                    self.order_e2l.append(order.clone(), local_recv_timestamp);
                    Ok(())
                }
                TimeInForce::FOK => {
                    let mut cum_qty = 0.0;
                    let mut execute = false;
                    for t in (order.price_tick..=self.depth.best_bid_tick()).rev() {
                        cum_qty += self.depth.bid_qty_at_tick(t);
                        if (cum_qty / self.depth.lot_size()).round()
                            >= (order.qty / self.depth.lot_size()).round()
                        {
                            execute = true;
                            break;
                        }
                    }
                    if execute {
                        self.take_bids(&mut order, order.price_tick, timestamp)?;
                        Ok(())
                    } else {
                        order.status = Status::Expired;
                        order.exch_timestamp = timestamp;
                        let local_recv_timestamp = timestamp + self.order_e2l.response(timestamp, &order);
                        self.order_e2l.append(order.clone(), local_recv_timestamp);
                        Ok(())
                    }
                }
                TimeInForce::IOC => {
                    if !self.take_bids(&mut order, order.price_tick, timestamp)? {
                        order.status = Status::Expired;
                        order.exch_timestamp = timestamp;
                        let local_recv_timestamp = timestamp + self.order_e2l.response(timestamp, &order);
                        self.order_e2l.append(order.clone(), local_recv_timestamp);
                    }
                    Ok(())
                }
                TimeInForce::GTC => {
                    if self.take_bids(&mut order, order.price_tick + 1, timestamp)? {
                        return Ok(());
                    }
                    let (price_tick, leaves_qty) = (order.price_tick, order.leaves_qty);
                    self.fill(&mut order, timestamp, false, price_tick, leaves_qty)
                }
            }
        } else {
            self.queue_model.new_order(&mut order, &self.depth);
            order.status = Status::New;
            self.sell_orders.entry(order.price_tick).or_default().insert(order.order_id);

            order.exch_timestamp = timestamp;
            let local_recv_timestamp = timestamp + self.order_e2l.response(timestamp, &order);
            self.order_e2l.append(order.clone(), local_recv_timestamp);
            self.orders.borrow_mut().insert(order.order_id, order);
            Ok(())
        }
    }

    fn ack_cancel(&mut self, mut order: Order, timestamp: i64) -> Result<(), BacktestError> {
        let exch_order = {
            let mut order_borrowed = self.orders.borrow_mut();
            order_borrowed.remove(&order.order_id)
        };

        if exch_order.is_none() {
            order.req = Status::Rejected;
            order.exch_timestamp = timestamp;
            let local_recv_timestamp = timestamp + self.order_e2l.response(timestamp, &order);
            self.order_e2l.append(order, local_recv_timestamp);
            return Ok(());
        }

        let mut exch_order = exch_order.unwrap();
        if exch_order.side == Side::Buy {
            self.buy_orders.get_mut(&exch_order.price_tick).unwrap().remove(&exch_order.order_id);
        } else {
            self.sell_orders.get_mut(&exch_order.price_tick).unwrap().remove(&exch_order.order_id);
        }

        exch_order.status = Status::Canceled;
        exch_order.exch_timestamp = timestamp;
        let local_recv_timestamp = timestamp + self.order_e2l.response(timestamp, &exch_order);
        self.order_e2l.append(exch_order.clone(), local_recv_timestamp);
        Ok(())
    }

    fn ack_modify(&mut self, mut order: Order, timestamp: i64) -> Result<(), BacktestError> {
        let mut exch_order = {
            let mut order_borrowed = self.orders.borrow_mut();
            let exch_order = order_borrowed.remove(&order.order_id);

            // The order may already have been deleted due to a fill or expiration.
            if exch_order.is_none() {
                order.req = Status::Rejected;
                order.exch_timestamp = timestamp;
                let local_recv_timestamp = timestamp + self.order_e2l.response(timestamp, &order);
                self.order_e2l.append(order, local_recv_timestamp);
                return Ok(());
            }

            exch_order.unwrap()
        };

        let prev_price_tick = exch_order.price_tick;
        exch_order.price_tick = order.price_tick;
        // The remaining quantity is replaced; any quantity already executed stays executed.
        exch_order.qty = order.qty;
        let init_q_pos = true;

        if exch_order.side == Side::Buy {
            if exch_order.price_tick >= self.depth.best_ask_tick() {
                self.buy_orders.get_mut(&prev_price_tick).unwrap().remove(&exch_order.order_id);

                if exch_order.time_in_force == TimeInForce::GTX {
                    exch_order.status = Status::Expired;
                } else if self.take_asks(&mut exch_order, exch_order.price_tick - 1, timestamp)? {
                    return Ok(());
                } else {
                    let (price_tick, leaves_qty) = (exch_order.price_tick, exch_order.leaves_qty);
                    return self.fill(&mut exch_order, timestamp, false, price_tick, leaves_qty);
                }

                exch_order.exch_timestamp = timestamp;
                let local_recv_timestamp = timestamp + self.order_e2l.response(timestamp, &exch_order);
                self.order_e2l.append(exch_order.clone(), local_recv_timestamp);
                Ok(())
            } else {
                if prev_price_tick != exch_order.price_tick {
                    self.buy_orders.get_mut(&prev_price_tick).unwrap().remove(&exch_order.order_id);
                    self.buy_orders.entry(exch_order.price_tick).or_default().insert(exch_order.order_id);
                }
                if init_q_pos || prev_price_tick != exch_order.price_tick {
                    self.queue_model.new_order(&mut exch_order, &self.depth);
                }
                exch_order.status = Status::New;

                exch_order.exch_timestamp = timestamp;
                let local_recv_timestamp = timestamp + self.order_e2l.response(timestamp, &exch_order);
                self.order_e2l.append(exch_order.clone(), local_recv_timestamp);

                self.orders.borrow_mut().insert(exch_order.order_id, exch_order);
                Ok(())
            }
        } else if exch_order.price_tick <= self.depth.best_bid_tick() {
            self.sell_orders.get_mut(&prev_price_tick).unwrap().remove(&exch_order.order_id);

            if exch_order.time_in_force == TimeInForce::GTX {
                exch_order.status = Status::Expired;
            } else if self.take_bids(&mut exch_order, exch_order.price_tick + 1, timestamp)? {
                return Ok(());
            } else {
                let (price_tick, leaves_qty) = (exch_order.price_tick, exch_order.leaves_qty);
                return self.fill(&mut exch_order, timestamp, false, price_tick, leaves_qty);
            }

            exch_order.exch_timestamp = timestamp;
            let local_recv_timestamp = timestamp + self.order_e2l.response(timestamp, &exch_order);
            self.order_e2l.append(exch_order.clone(), local_recv_timestamp);
            Ok(())
        } else {
            if prev_price_tick != exch_order.price_tick {
                self.sell_orders.get_mut(&prev_price_tick).unwrap().remove(&exch_order.order_id);
                self.sell_orders.entry(exch_order.price_tick).or_default().insert(exch_order.order_id);
            }
            if init_q_pos || prev_price_tick != exch_order.price_tick {
                self.queue_model.new_order(&mut exch_order, &self.depth);
            }
            exch_order.status = Status::New;

            exch_order.exch_timestamp = timestamp;
            let local_recv_timestamp = timestamp + self.order_e2l.response(timestamp, &exch_order);
            self.order_e2l.append(exch_order.clone(), local_recv_timestamp);

            self.orders.borrow_mut().insert(exch_order.order_id, exch_order);
            Ok(())
        }
    }
}

impl<AT, LM, QM, MD, FM> Processor for PartialFillExchange<AT, LM, QM, MD, FM>
where
    AT: AssetType,
    LM: LatencyModel,
    QM: QueueModel<MD>,
    MD: MarketDepth + L2MarketDepth,
    FM: FeeModel,
{
    fn event_seen_timestamp(&self, event: &Event) -> Option<i64> {
        event.is(EXCH_EVENT).then_some(event.exch_ts)
    }

    fn process(&mut self, ev: &Event) -> Result<(), BacktestError> {
        if ev.is(EXCH_BID_DEPTH_CLEAR_EVENT) {
            self.depth.clear_depth(Side::Buy, ev.px);
        } else if ev.is(EXCH_ASK_DEPTH_CLEAR_EVENT) {
            self.depth.clear_depth(Side::Sell, ev.px);
        } else if ev.is(EXCH_DEPTH_CLEAR_EVENT) {
            self.depth.clear_depth(Side::None, 0.0);
        } else if ev.is(EXCH_BID_DEPTH_EVENT) || ev.is(EXCH_BID_DEPTH_SNAPSHOT_EVENT) {
            let (price_tick, prev_best_bid_tick, best_bid_tick, prev_qty, new_qty, timestamp) =
                self.depth.update_bid_depth(ev.px, ev.qty, ev.exch_ts);
            self.on_bid_qty_chg(price_tick, prev_qty, new_qty);
            if best_bid_tick > prev_best_bid_tick {
                self.on_best_bid_update(prev_best_bid_tick, best_bid_tick, timestamp)?;
            }
        } else if ev.is(EXCH_ASK_DEPTH_EVENT) || ev.is(EXCH_ASK_DEPTH_SNAPSHOT_EVENT) {
            let (price_tick, prev_best_ask_tick, best_ask_tick, prev_qty, new_qty, timestamp) =
                self.depth.update_ask_depth(ev.px, ev.qty, ev.exch_ts);
            self.on_ask_qty_chg(price_tick, prev_qty, new_qty);
            if best_ask_tick < prev_best_ask_tick {
                self.on_best_ask_update(prev_best_ask_tick, best_ask_tick, timestamp)?;
            }
        } else if ev.is(EXCH_BUY_TRADE_EVENT) {
            let price_tick = (ev.px / self.depth.tick_size()).round() as i64;
            let qty = ev.qty;
            {
                let orders = self.orders.clone();
                let mut orders_borrowed = orders.borrow_mut();
                if self.depth.best_bid_tick() == INVALID_MIN
                    || (orders_borrowed.len() as i64) < price_tick - self.depth.best_bid_tick()
                {
                    for (_, order) in orders_borrowed.iter_mut() {
                        if order.side == Side::Sell {
                            self.check_if_sell_filled(order, price_tick, qty, ev.exch_ts)?;
                        }
                    }
                } else {
                    for t in (self.depth.best_bid_tick() + 1)..=price_tick {
                        if let Some(order_ids) = self.sell_orders.get(&t) {
                            for order_id in order_ids.clone().iter() {
                                let order = orders_borrowed.get_mut(order_id).unwrap();
                                self.check_if_sell_filled(order, price_tick, qty, ev.exch_ts)?;
                            }
                        }
                    }
                }
            }
            self.remove_filled_orders();
        } else if ev.is(EXCH_SELL_TRADE_EVENT) {
            let price_tick = (ev.px / self.depth.tick_size()).round() as i64;
            let qty = ev.qty;
            {
                let orders = self.orders.clone();
                let mut orders_borrowed = orders.borrow_mut();
                if self.depth.best_ask_tick() == INVALID_MAX
                    || (orders_borrowed.len() as i64) < self.depth.best_ask_tick() - price_tick
                {
                    for (_, order) in orders_borrowed.iter_mut() {
                        if order.side == Side::Buy {
                            self.check_if_buy_filled(order, price_tick, qty, ev.exch_ts)?;
                        }
                    }
                } else {
                    for t in (price_tick..self.depth.best_ask_tick()).rev() {
                        if let Some(order_ids) = self.buy_orders.get(&t) {
                            for order_id in order_ids.clone().iter() {
                                let order = orders_borrowed.get_mut(order_id).unwrap();
                                self.check_if_buy_filled(order, price_tick, qty, ev.exch_ts)?;
                            }
                        }
                    }
                }
            }
            self.remove_filled_orders();
        }
        Ok(())
    }

    fn process_recv_order(
        &mut self,
        timestamp: i64,
        _wait_resp_order_id: Option<OrderId>,
    ) -> Result<bool, BacktestError> {
        while !self.order_e2l.is_empty() {
            let recv_timestamp = self.order_e2l.earliest_timestamp().unwrap();
            if timestamp == recv_timestamp {
                let (order, _) = self.order_e2l.pop_front().unwrap();
                self.process_recv_order_(order, recv_timestamp)?;
            } else {
                assert!(recv_timestamp > timestamp);
                break;
            }
        }
        Ok(false)
    }

    fn earliest_recv_order_timestamp(&self) -> i64 {
        self.order_e2l.earliest_timestamp().unwrap_or(i64::MAX)
    }

    fn earliest_send_order_timestamp(&self) -> i64 {
        self.order_e2l.earliest_send_timestamp().unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backtest::{
            assettype::LinearAsset,
            models::{ConstantLatency, RiskAdverseQueueModel},
            order::order_bus,
            state::State,
        },
        depth::HashMapMarketDepth,
        types::{OrdType, Status as OrderStatus},
    };

    fn sample_exchange() -> PartialFillExchange<
        LinearAsset,
        ConstantLatency,
        RiskAdverseQueueModel<HashMapMarketDepth>,
        HashMapMarketDepth,
        crate::backtest::models::FlatPerTradeFeeModel<crate::backtest::models::CommonFees>,
    > {
        let depth = HashMapMarketDepth::new(0.1, 1.0);
        let state = State::new(
            LinearAsset::new(1.0),
            crate::backtest::models::FlatPerTradeFeeModel::new(
                crate::backtest::models::CommonFees::new(0.0, 0.0),
            ),
        );
        let (order_e2l, _order_l2e) = order_bus(ConstantLatency::new(0, 0));
        PartialFillExchange::new(depth, state, RiskAdverseQueueModel::new(), order_e2l)
    }

    #[test]
    fn ioc_buy_crossing_partially_fills_against_thin_book() {
        let mut exch = sample_exchange();
        exch.depth.update_ask_depth(101.0, 2.0, 0);

        let mut order = Order::new(1, 1010, 0.1, 5.0, Side::Buy, OrdType::Limit, TimeInForce::IOC);
        order.req = OrderStatus::New;
        exch.ack_new(order, 0).unwrap();

        assert!(exch.orders.borrow().is_empty());
    }

    #[test]
    fn gtx_buy_crossing_book_is_expired_not_filled() {
        let mut exch = sample_exchange();
        exch.depth.update_ask_depth(101.0, 2.0, 0);

        let mut order = Order::new(2, 1010, 0.1, 1.0, Side::Buy, OrdType::Limit, TimeInForce::GTX);
        order.req = OrderStatus::New;
        exch.ack_new(order, 0).unwrap();

        assert!(exch.orders.borrow().is_empty());
    }
}
