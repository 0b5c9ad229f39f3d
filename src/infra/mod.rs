// Infrastructure layer - 基础设施层
// 目前只有 Prometheus 指标导出

pub mod metrics;
