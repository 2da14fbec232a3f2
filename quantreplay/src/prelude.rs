pub use crate::{
    backtest::{
        assettype::{AssetType, LinearAsset},
        data::DataSource,
        models::{
            CommonFees,
            ConstantLatency,
            FeeModel,
            LatencyModel,
            PowerProbQueueFunc3,
            ProbQueueModel,
            QueueModel,
            TradingValueFeeModel,
        },
        recorder::BacktestRecorder,
        Asset,
        Backtest,
        BacktestError,
        ExchangeKind,
        L2AssetBuilder,
    },
    depth::{ApplySnapshot, HashMapMarketDepth, L2MarketDepth, MarketDepth, ROIVectorMarketDepth},
    types::*,
};
