mod fee;
mod latency;
mod queue;

pub use fee::{
    CommonFees,
    DirectionalFees,
    FeeModel,
    FlatPerTradeFeeModel,
    TradingQtyFeeModel,
    TradingValueFeeModel,
};
pub use latency::{
    BackwardFeedLatency,
    ConstantLatency,
    FeedLatency,
    ForwardFeedLatency,
    IntpOrderLatency,
    LatencyModel,
    OrderLatencyRow,
};
pub use queue::{
    LogProbQueueFunc,
    LogProbQueueFunc2,
    PowerProbQueueFunc,
    PowerProbQueueFunc2,
    PowerProbQueueFunc3,
    ProbQueueModel,
    Probability,
    QueueModel,
    QueuePos,
    RiskAdverseQueueModel,
};
