use std::{cell::{RefCell, UnsafeCell}, collections::VecDeque, rc::Rc};

use crate::{backtest::models::LatencyModel, types::Order};

/// Provides a bus for transporting backtesting orders between the exchange and the local model
/// based on the given timestamp.
#[derive(Clone, Debug, Default)]
pub struct OrderBus {
    order_list: Rc<UnsafeCell<VecDeque<(Order, i64)>>>,
}

impl OrderBus {
    /// Constructs an instance of ``OrderBus``.
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns the timestamp of the earliest order in the bus.
    pub fn earliest_timestamp(&self) -> Option<i64> {
        unsafe { &*self.order_list.get() }
            .front()
            .map(|(_order, ts)| *ts)
    }

    /// Appends the order to the bus with the timestamp.
    ///
    /// To prevent the timestamp of the order from becoming disordered, it enforces that the given
    /// timestamp must be equal to or greater than the latest timestamp in the bus.
    ///
    /// In crypto exchanges that use REST APIs, it may be still possible for order requests sent
    /// later to reach the matching engine before order requests sent earlier. However, for the
    /// purpose of simplifying the backtesting process, all requests and responses are assumed to be
    /// in order.
    pub fn append(&mut self, order: Order, timestamp: i64) {
        let latest_timestamp = {
            let order_list = unsafe { &*self.order_list.get() };
            let len = order_list.len();
            if len > 0 {
                let (_, timestamp) = order_list.get(len - 1).unwrap();
                *timestamp
            } else {
                0
            }
        };
        let timestamp = timestamp.max(latest_timestamp);
        unsafe { &mut *self.order_list.get() }.push_back((order, timestamp));
    }

    /// Resets this to clear it.
    pub fn reset(&mut self) {
        unsafe { &mut *self.order_list.get() }.clear();
    }

    /// Returns the number of orders in the bus.
    pub fn len(&self) -> usize {
        unsafe { &*self.order_list.get() }.len()
    }

    /// Returns ``true`` if the ``OrderBus`` is empty.
    pub fn is_empty(&self) -> bool {
        unsafe { &*self.order_list.get() }.is_empty()
    }

    /// Removes the first order and its timestamp and returns it, or ``None`` if the bus is empty.
    pub fn pop_front(&mut self) -> Option<(Order, i64)> {
        unsafe { &mut *self.order_list.get() }.pop_front()
    }
}

/// The local-side handle of a pair of order buses connecting a `Local` to its exchange
/// counterpart: it submits order requests onto the forward (local-to-exchange) bus, delayed by
/// the latency model's entry latency, and reads order responses off the backward
/// (exchange-to-local) bus.
pub struct LocalToExch<LM: LatencyModel> {
    request: OrderBus,
    response: OrderBus,
    latency_model: Rc<RefCell<LM>>,
}

impl<LM: LatencyModel> LocalToExch<LM> {
    /// Submits an order request, to be delivered to the exchange after the latency model's entry
    /// latency has elapsed.
    ///
    /// If the latency model reports a negative entry latency, the exchange is treated as
    /// unreachable for this request: `reject` is applied to the order (it is expected to set
    /// `order.req = Status::Rejected` and undo any speculative local mutation) and the rejection
    /// is placed directly onto the response bus, skipping the exchange, with the response
    /// arriving after `-latency` — the latency the local experiences receiving the rejection
    /// notice.
    pub fn request<F>(&mut self, mut order: Order, reject: F)
    where
        F: FnOnce(&mut Order),
    {
        let timestamp = order.local_timestamp;
        let latency = self.latency_model.borrow_mut().entry(timestamp, &order);
        if latency < 0 {
            reject(&mut order);
            order.exch_timestamp = 0;
            self.response.append(order, timestamp + (-latency));
        } else {
            self.request.append(order, timestamp + latency);
        }
    }

    /// Returns the next order response if its timestamp has arrived by `timestamp`.
    pub fn receive(&mut self, timestamp: i64) -> Option<Order> {
        match self.response.earliest_timestamp() {
            Some(ts) if ts <= timestamp => self.response.pop_front().map(|(order, _)| order),
            _ => None,
        }
    }

    /// Returns the timestamp of the next pending order response, if any.
    pub fn earliest_recv_order_timestamp(&self) -> Option<i64> {
        self.response.earliest_timestamp()
    }

    /// Returns the timestamp of the next order request still in flight to the exchange, if any.
    pub fn earliest_send_order_timestamp(&self) -> Option<i64> {
        self.request.earliest_timestamp()
    }
}

/// The exchange-side handle of a pair of order buses connecting an exchange processor to its
/// local counterpart: it reads pending order requests off the forward bus and appends responses
/// to the backward bus, delayed by the latency model's response latency.
pub struct ExchToLocal<LM: LatencyModel> {
    request: OrderBus,
    response: OrderBus,
    latency_model: Rc<RefCell<LM>>,
}

impl<LM: LatencyModel> ExchToLocal<LM> {
    /// Returns `true` if there are no pending order requests.
    pub fn is_empty(&self) -> bool {
        self.request.is_empty()
    }

    /// Returns the timestamp of the next pending order request, if any.
    pub fn earliest_timestamp(&self) -> Option<i64> {
        self.request.earliest_timestamp()
    }

    /// Returns the timestamp of the next order response still in flight to the local, if any.
    pub fn earliest_send_timestamp(&self) -> Option<i64> {
        self.response.earliest_timestamp()
    }

    /// Removes and returns the next pending order request along with its timestamp.
    pub fn pop_front(&mut self) -> Option<(Order, i64)> {
        self.request.pop_front()
    }

    /// Computes the response latency for the given order, via the shared latency model.
    pub fn response(&mut self, timestamp: i64, order: &Order) -> i64 {
        self.latency_model.borrow_mut().response(timestamp, order)
    }

    /// Appends an order response, to be delivered to the local at the given timestamp.
    pub fn append(&mut self, order: Order, timestamp: i64) {
        self.response.append(order, timestamp);
    }
}

/// Constructs a connected pair of order bus handles sharing one latency model instance: the
/// exchange-facing end first, then the local-facing end, matching the tuple destructuring used
/// throughout asset construction (`let (order_e2l, order_l2e) = order_bus(latency_model);`).
pub fn order_bus<LM: LatencyModel>(latency_model: LM) -> (ExchToLocal<LM>, LocalToExch<LM>) {
    let request = OrderBus::new();
    let response = OrderBus::new();
    let latency_model = Rc::new(RefCell::new(latency_model));
    (
        ExchToLocal {
            request: request.clone(),
            response: response.clone(),
            latency_model: latency_model.clone(),
        },
        LocalToExch {
            request,
            response,
            latency_model,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backtest::models::ConstantLatency, types::{OrdType, Side, Status, TimeInForce}};

    fn sample_order(order_id: u64) -> Order {
        let mut order = Order::new(order_id, 100, 0.1, 1.0, Side::Buy, OrdType::Limit, TimeInForce::GTC);
        order.local_timestamp = 1_000;
        order
    }

    #[test]
    fn request_is_delayed_by_entry_latency() {
        let (mut order_e2l, mut order_l2e) = order_bus(ConstantLatency::new(50, 100));
        order_l2e.request(sample_order(1), |order| order.status = Status::Rejected);
        assert_eq!(order_e2l.earliest_timestamp(), Some(1_050));
        let (order, ts) = order_e2l.pop_front().unwrap();
        assert_eq!(order.order_id, 1);
        assert_eq!(ts, 1_050);
    }

    #[test]
    fn negative_entry_latency_rejects_without_reaching_exchange() {
        let (order_e2l, mut order_l2e) = order_bus(ConstantLatency::new(-30, 100));
        order_l2e.request(sample_order(2), |order| order.status = Status::Rejected);
        assert!(order_e2l.is_empty());
        let rejected = order_l2e.receive(1_030).unwrap();
        assert_eq!(rejected.status, Status::Rejected);
    }
}
