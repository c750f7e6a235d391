use serde::{Deserialize, Serialize};

use crate::event::FixedStr;
use crate::LABEL_LEN;

/// pid -> {pod, container} 映射条目
/// 由外部身份控制器写入，引擎只读
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub pod: String,
    pub container: String,
    pub pid: u64,
}

impl IdentityRecord {
    pub fn new(pod: impl Into<String>, container: impl Into<String>, pid: u64) -> Self {
        Self {
            pod: pod.into(),
            container: container.into(),
            pid,
        }
    }

    /// 定长 pod 字段（超长截断）
    pub fn pod_field(&self) -> FixedStr<LABEL_LEN> {
        FixedStr::from_bytes(self.pod.as_bytes())
    }

    /// 定长 container 字段（超长截断）
    pub fn container_field(&self) -> FixedStr<LABEL_LEN> {
        FixedStr::from_bytes(self.container.as_bytes())
    }
}
