use crate::board::snapshot::HeatId;

pub static DEFAULT_SCORECARD_URL: &str =
    "https://unified-data-api.resova.io/api/Heats/GetScorecard";
pub static DEFAULT_PUBSUB_URL: &str = "wss://unified-pub-sub.resova.io/ws";

/// Query parameter carrying the heat number on scorecard requests.
pub static HEAT_QUERY_KEY: &str = "heatNo";

/// Push channel of a heat.
pub fn channel_name(heat: &HeatId) -> String {
    format!("race_{}", heat)
}

/// Full subscription url for a heat on the push service at `pubsub_url`.
pub fn channel_url(pubsub_url: &str, heat: &HeatId) -> String {
    let sep = if pubsub_url.contains('?') { '&' } else { '?' };
    format!("{}{}channel={}", pubsub_url, sep, channel_name(heat))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_urls() {
        let heat = HeatId::parse("1234").unwrap();
        assert_eq!(channel_name(&heat), "race_1234");
        assert_eq!(
            channel_url(DEFAULT_PUBSUB_URL, &heat),
            "wss://unified-pub-sub.resova.io/ws?channel=race_1234"
        );
        assert_eq!(
            channel_url("ws://localhost:9000/ws?token=x", &heat),
            "ws://localhost:9000/ws?token=x&channel=race_1234"
        );
    }
}
