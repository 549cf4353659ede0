use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};

#[derive(Debug)]
struct Instrumented {
    models: crate::models::SharedIndex,
    tiers: crate::tiers::SharedIndex,
}

pub fn register(
    reg: &mut Registry,
    models: crate::models::SharedIndex,
    tiers: crate::tiers::SharedIndex,
) {
    reg.register_collector(Box::new(Instrumented { models, tiers }));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let model_encoder = encoder.encode_descriptor(
            "model_index_size",
            "The number of entries in the model index",
            None,
            MetricType::Gauge,
        )?;
        let models = ConstGauge::new(self.models.read().len() as u32);
        models.encode(model_encoder)?;

        let tier_encoder = encoder.encode_descriptor(
            "tier_mapping_size",
            "The number of tiers in the current tier mapping",
            None,
            MetricType::Gauge,
        )?;
        let tiers = ConstGauge::new(self.tiers.read().mapping().len() as u32);
        tiers.encode(tier_encoder)?;

        Ok(())
    }
}
