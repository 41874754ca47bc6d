use thiserror::Error;

#[derive(Debug, Error)]
pub enum DistributedError {
    #[error("存储错误: {0}")]
    Store(String),
    #[error("存储操作超时: {0}")]
    Timeout(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("已有其他Master实例在运行")]
    MasterAlreadyRunning,
    #[error("失去领导权")]
    LeadershipLost,
    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },
    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: String },
    #[error("工作流未找到: {name}")]
    WorkflowNotFound { name: String },
    #[error("任务执行错误: {0}")]
    TaskExecution(String),
    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type DistributedResult<T> = Result<T, DistributedError>;

impl DistributedError {
    pub fn store_error<S: Into<String>>(msg: S) -> Self {
        Self::Store(msg.into())
    }
    pub fn task_not_found<S: Into<String>>(id: S) -> Self {
        Self::TaskNotFound { id: id.into() }
    }
    pub fn worker_not_found<S: Into<String>>(id: S) -> Self {
        Self::WorkerNotFound { id: id.into() }
    }
    pub fn workflow_not_found<S: Into<String>>(name: S) -> Self {
        Self::WorkflowNotFound { name: name.into() }
    }
    pub fn invalid_params<S: Into<String>>(msg: S) -> Self {
        Self::InvalidTaskParams(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DistributedError::Internal(_)
                | DistributedError::Configuration(_)
                | DistributedError::MasterAlreadyRunning
                | DistributedError::LeadershipLost
        )
    }
    /// 存储传输类错误，调用方可以在下一个周期重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DistributedError::Store(_) | DistributedError::Timeout(_)
        )
    }
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DistributedError::TaskNotFound { .. }
                | DistributedError::WorkerNotFound { .. }
                | DistributedError::WorkflowNotFound { .. }
        )
    }
    pub fn user_message(&self) -> &str {
        match self {
            DistributedError::TaskNotFound { .. } => "请求的任务不存在",
            DistributedError::WorkerNotFound { .. } => "请求的Worker节点不存在",
            DistributedError::WorkflowNotFound { .. } => "请求的工作流不存在",
            DistributedError::MasterAlreadyRunning => "已有Master实例在运行",
            DistributedError::InvalidTaskParams(_) => "任务参数配置有误",
            DistributedError::Timeout(_) => "操作超时，请稍后重试",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for DistributedError {
    fn from(err: serde_json::Error) -> Self {
        DistributedError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for DistributedError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            DistributedError::Timeout(err.to_string())
        } else {
            DistributedError::Store(err.to_string())
        }
    }
}

impl From<anyhow::Error> for DistributedError {
    fn from(err: anyhow::Error) -> Self {
        DistributedError::Internal(err.to_string())
    }
}
