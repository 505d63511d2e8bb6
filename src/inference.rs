//! Client for the hosted image-generation endpoint.

use crate::log_internal;
use anyhow::{anyhow, Result};

// Generation parameters are fixed; only the prompt varies between calls.
const SEED: i64 = 0;
const RANDOMIZE_SEED: bool = true;
const WIDTH: u32 = 512;
const HEIGHT: u32 = 512;
const INFERENCE_STEPS: u32 = 4;

#[derive(serde::Serialize)]
pub struct InferenceRequest {
    prompt: String,
    seed: i64,
    randomize_seed: bool,
    width: u32,
    height: u32,
    num_inference_steps: u32,
}

#[derive(Debug, serde::Deserialize)]
pub struct InferenceResponse {
    /// Where the generated image can be downloaded from.
    pub image_url: String,
    /// The seed the endpoint actually used after randomization.
    pub seed: Option<i64>,
}

impl InferenceRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            seed: SEED,
            randomize_seed: RANDOMIZE_SEED,
            width: WIDTH,
            height: HEIGHT,
            num_inference_steps: INFERENCE_STEPS,
        }
    }

    pub async fn post(&self, url: &str) -> Result<InferenceResponse> {
        log_internal!("Sending request to inference endpoint {}... ", url);
        let client = reqwest::Client::new();
        let response = client
            .post(url)
            .json(self)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| anyhow!("Inference endpoint rejected the request: {}", e))?
            .json::<InferenceResponse>()
            .await?;
        log_internal!("Sending request to inference endpoint {}... done", url);

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_fixed_parameters() {
        let request = InferenceRequest::new("a quiet harbor");
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["prompt"], "a quiet harbor");
        assert_eq!(json["seed"], 0);
        assert_eq!(json["randomize_seed"], true);
        assert_eq!(json["width"], 512);
        assert_eq!(json["height"], 512);
        assert_eq!(json["num_inference_steps"], 4);
    }

    #[test]
    fn response_parses_with_and_without_seed() {
        let with_seed: InferenceResponse =
            serde_json::from_str(r#"{"image_url": "https://img.example/1.png", "seed": 99}"#)
                .unwrap();
        assert_eq!(with_seed.image_url, "https://img.example/1.png");
        assert_eq!(with_seed.seed, Some(99));

        let without_seed: InferenceResponse =
            serde_json::from_str(r#"{"image_url": "https://img.example/2.png"}"#).unwrap();
        assert_eq!(without_seed.seed, None);
    }
}
