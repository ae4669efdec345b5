use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Metrics はリコンサイルループの Prometheus メトリクスを保持する。
pub struct Metrics {
    reconcile_total: IntCounterVec,
    rotations_total: IntCounter,
    reconcile_duration: Histogram,
    registry: Registry,
}

/// デフォルトのヒストグラムバケット（秒）。
const DEFAULT_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

impl Metrics {
    /// new は Prometheus メトリクスを初期化して返す。
    /// service_name はメトリクスの service ラベルに使用される。
    pub fn new(service_name: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new(
                "configmap_rotator_reconcile_total",
                "Total number of reconcile invocations by result",
            )
            .const_label("service", service_name),
            &["result"],
        )?;

        let rotations_total = IntCounter::with_opts(
            Opts::new(
                "configmap_rotator_rotations_total",
                "Total number of successful ConfigMap rotations",
            )
            .const_label("service", service_name),
        )?;

        let reconcile_duration = Histogram::with_opts(
            HistogramOpts::new(
                "configmap_rotator_reconcile_duration_seconds",
                "Histogram of reconcile latency",
            )
            .const_label("service", service_name)
            .buckets(DEFAULT_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(rotations_total.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;

        Ok(Self {
            reconcile_total,
            rotations_total,
            reconcile_duration,
            registry,
        })
    }

    /// record_reconcile はリコンサイル結果のカウンタとレイテンシを記録する。
    pub fn record_reconcile(&self, result: &str, duration_secs: f64) {
        self.reconcile_total.with_label_values(&[result]).inc();
        self.reconcile_duration.observe(duration_secs);
    }

    /// record_rotation はローテーション成功カウンタをインクリメントする。
    pub fn record_rotation(&self) {
        self.rotations_total.inc();
    }

    pub fn reconcile_count(&self, result: &str) -> u64 {
        self.reconcile_total.with_label_values(&[result]).get()
    }

    pub fn rotation_count(&self) -> u64 {
        self.rotations_total.get()
    }

    /// gather_metrics は Prometheus テキストフォーマットでメトリクスを返す。
    /// /metrics エンドポイントのハンドラで使用する。
    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
