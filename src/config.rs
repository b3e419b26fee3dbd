use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::predictor::Label;
use crate::preprocess::DEFAULT_MAX_SIZE;

pub const DEFAULT_THRESH_AUTH: f32 = 0.15;
pub const DEFAULT_THRESH_SYN: f32 = 0.70;

/// 两个有序阈值：auth < syn，构造时校验，之后不可能处于非法状态
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    #[serde(rename = "thresh_auth")]
    auth: f32,
    #[serde(rename = "thresh_syn")]
    syn: f32,
}

impl Thresholds {
    pub fn new(auth: f32, syn: f32) -> Result<Self, ConfigError> {
        for (name, value) in [("thresh_auth", auth), ("thresh_syn", syn)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ThresholdRange { name, value });
            }
        }
        if syn <= auth {
            return Err(ConfigError::ThresholdOrder { auth, syn });
        }
        Ok(Self { auth, syn })
    }

    pub fn auth(&self) -> f32 {
        self.auth
    }

    pub fn syn(&self) -> f32 {
        self.syn
    }

    /// 概率 → 三分类标签：[0, auth) / [auth, syn) / [syn, 1]
    pub fn classify(&self, probability: f32) -> Label {
        if probability < self.auth {
            Label::Authentic
        } else if probability < self.syn {
            Label::Suspicious
        } else {
            Label::Synthetic
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            auth: DEFAULT_THRESH_AUTH,
            syn: DEFAULT_THRESH_SYN,
        }
    }
}

// 反序列化也必须经过校验，否则 PUT /admin/thresholds 可以绕过顺序约束
impl<'de> Deserialize<'de> for Thresholds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            thresh_auth: f32,
            thresh_syn: f32,
        }
        let raw = Raw::deserialize(deserializer)?;
        Thresholds::new(raw.thresh_auth, raw.thresh_syn).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub artifacts_dir: PathBuf,
    pub real_corpus_dir: Option<PathBuf>,
    pub thresholds: Thresholds,
    pub max_image_mb: usize,
    pub max_image_side: u32,
    pub train_seed: u64,
    pub samples_per_class: usize,
    pub train_on_start: bool,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let thresholds = Thresholds::new(
            parse_var("THRESH_AUTH", DEFAULT_THRESH_AUTH, "a number in [0, 1]")?,
            parse_var("THRESH_SYN", DEFAULT_THRESH_SYN, "a number in [0, 1]")?,
        )?;

        let max_image_mb: usize = parse_var("MAX_IMAGE_MB", 8, "an integer in 1..=50")?;
        if !(1..=50).contains(&max_image_mb) {
            return Err(ConfigError::Invalid {
                name: "MAX_IMAGE_MB",
                expected: "an integer in 1..=50",
                value: max_image_mb.to_string(),
            });
        }

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_var("PORT", 8000, "a port number")?,
            artifacts_dir: env::var("ARTIFACTS_DIR")
                .unwrap_or_else(|_| "data/artifacts".to_string())
                .into(),
            real_corpus_dir: Some(
                env::var("REAL_CORPUS_DIR")
                    .unwrap_or_else(|_| "data/real".to_string())
                    .into(),
            ),
            thresholds,
            max_image_mb,
            max_image_side: parse_var("MAX_IMAGE_SIDE", DEFAULT_MAX_SIZE, "a positive integer")?,
            train_seed: parse_var("TRAIN_SEED", 42, "an unsigned integer")?,
            samples_per_class: parse_var("SAMPLES_PER_CLASS", 60, "an unsigned integer")?,
            train_on_start: parse_var("TRAIN_ON_START", true, "true or false")?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn parse_var<T: FromStr>(
    name: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            expected,
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}
