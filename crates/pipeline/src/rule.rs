//! 사용자 정의 규칙 파일 로더 -- YAML 규칙 목록을 디스크에서 로드합니다.
//!
//! 파일 형식:
//! ```yaml
//! rules:
//!   - id: big_packet
//!     name: Oversized packet
//!     metric: packet_size
//!     threshold: 1400
//!     severity: medium
//! ```
//!
//! 로드된 규칙은 [`RuleStore`](packethunter_core::pipeline::RuleStore) 구현에 채워지고,
//! 탐지 엔진은 생성 시 활성 규칙만 읽어갑니다.

use std::collections::HashSet;
use std::path::Path;

use packethunter_core::types::CustomRule;
use serde::Deserialize;

use crate::error::IngestError;

const MAX_RULE_FILE_SIZE: u64 = 1024 * 1024; // 1MB
const MAX_RULES_COUNT: usize = 1_000;

/// 규칙 파일 최상위 구조
#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<CustomRule>,
}

/// 규칙 파일 로더
pub struct RuleLoader;

impl RuleLoader {
    /// YAML 파일에서 규칙 목록을 로드합니다.
    ///
    /// # Errors
    /// - 파일을 읽을 수 없거나 크기 제한을 넘는 경우
    /// - YAML 파싱 또는 검증에 실패한 경우
    pub async fn load_file(path: impl AsRef<Path>) -> Result<Vec<CustomRule>, IngestError> {
        let path = path.as_ref();
        let source = path.display().to_string();

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| IngestError::RuleLoad {
                path: source.clone(),
                reason: format!("failed to read file metadata: {e}"),
            })?;

        if metadata.len() > MAX_RULE_FILE_SIZE {
            return Err(IngestError::RuleLoad {
                path: source,
                reason: format!(
                    "file too large: {} bytes (max: {MAX_RULE_FILE_SIZE})",
                    metadata.len()
                ),
            });
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| IngestError::RuleLoad {
                path: source.clone(),
                reason: format!("failed to read file: {e}"),
            })?;

        let rules = Self::parse_yaml(&content, &source)?;
        tracing::info!(path = %source, count = rules.len(), "loaded custom rules");
        Ok(rules)
    }

    /// YAML 문자열을 파싱합니다. 중복 ID는 경고 후 건너뜁니다.
    pub fn parse_yaml(yaml_str: &str, source: &str) -> Result<Vec<CustomRule>, IngestError> {
        let file: RuleFile = serde_yaml::from_str(yaml_str).map_err(|e| IngestError::RuleLoad {
            path: source.to_owned(),
            reason: format!("YAML parse error: {e}"),
        })?;

        if file.rules.len() > MAX_RULES_COUNT {
            return Err(IngestError::RuleLoad {
                path: source.to_owned(),
                reason: format!("too many rules: max {MAX_RULES_COUNT}"),
            });
        }

        let mut seen_ids = HashSet::new();
        let mut rules = Vec::with_capacity(file.rules.len());
        for rule in file.rules {
            if rule.id.trim().is_empty() || rule.name.trim().is_empty() {
                return Err(IngestError::RuleLoad {
                    path: source.to_owned(),
                    reason: "rule id and name must not be empty".to_owned(),
                });
            }
            if !seen_ids.insert(rule.id.clone()) {
                tracing::warn!(rule_id = %rule.id, path = source, "duplicate rule id, skipping");
                continue;
            }
            rules.push(rule);
        }

        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packethunter_core::types::Severity;

    #[test]
    fn parse_valid_yaml() {
        let yaml = r#"
rules:
  - id: big_packet
    name: Oversized packet
    metric: packet_size
    threshold: 1400
    severity: medium
  - id: jumbo
    name: Jumbo frame
    enabled: false
    metric: packet_size
    threshold: 9000
    action: log
"#;
        let rules = RuleLoader::parse_yaml(yaml, "rules.yml").unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].severity, Severity::Medium);
        assert_eq!(rules[0].comparison, "greater_than");
        assert!(!rules[1].enabled);
        assert_eq!(rules[1].action, "log");
    }

    #[test]
    fn empty_document_yields_no_rules() {
        assert!(RuleLoader::parse_yaml("rules: []", "empty.yml").unwrap().is_empty());
    }

    #[test]
    fn duplicate_ids_are_skipped() {
        let yaml = r#"
rules:
  - { id: a, name: first, metric: packet_size, threshold: 1 }
  - { id: a, name: second, metric: packet_size, threshold: 2 }
"#;
        let rules = RuleLoader::parse_yaml(yaml, "dup.yml").unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "first");
    }

    #[test]
    fn empty_id_is_rejected() {
        let yaml = r#"
rules:
  - { id: "", name: x, metric: packet_size, threshold: 1 }
"#;
        assert!(matches!(
            RuleLoader::parse_yaml(yaml, "bad.yml"),
            Err(IngestError::RuleLoad { .. })
        ));
    }

    #[test]
    fn invalid_yaml_returns_error() {
        assert!(RuleLoader::parse_yaml("rules: [valid: yaml: {{{", "bad.yml").is_err());
    }

    #[tokio::test]
    async fn load_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.yml");
        tokio::fs::write(
            &path,
            "rules:\n  - { id: r1, name: big, metric: packet_size, threshold: 100 }\n",
        )
        .await
        .unwrap();
        let rules = RuleLoader::load_file(&path).await.unwrap();
        assert_eq!(rules[0].threshold, 100);
    }

    #[tokio::test]
    async fn load_missing_file_returns_error() {
        assert!(RuleLoader::load_file("/nonexistent/rules.yml").await.is_err());
    }
}
