use std::io;

use thiserror::Error;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const BIND: OperationKind = OperationKind {
    code: "spark.endpoint.tcp.bind_failed",
    message: "tcp bind",
};
pub(crate) const LISTEN: OperationKind = OperationKind {
    code: "spark.endpoint.tcp.listen_failed",
    message: "tcp listen",
};
pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "spark.endpoint.tcp.connect_failed",
    message: "tcp connect",
};
pub(crate) const ACCEPT: OperationKind = OperationKind {
    code: "spark.endpoint.tcp.accept_failed",
    message: "tcp accept",
};
pub(crate) const RESOLVE: OperationKind = OperationKind {
    code: "spark.endpoint.tcp.resolve_failed",
    message: "dns resolve",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "spark.endpoint.tcp.configure_failed",
    message: "tcp configure",
};
pub(crate) const SERVE: OperationKind = OperationKind {
    code: "spark.endpoint.tcp.serve_failed",
    message: "connection handler",
};

/// 记录带稳定错误码的 IO 失败，并返回保留原始 `ErrorKind` 的错误。
///
/// 端点状态机只关心 `ErrorKind`；错误码与文案只进入日志。
pub(crate) fn annotate(kind: OperationKind, error: io::Error) -> io::Error {
    tracing::debug!(code = kind.code, %error, "{} failed", kind.message);
    io::Error::new(error.kind(), format!("{}: {}", kind.message, error))
}

/// 套接字尚未打开时调用选项/绑定等操作。
pub(crate) fn not_open(kind: OperationKind) -> io::Error {
    annotate(
        kind,
        io::Error::new(io::ErrorKind::NotConnected, "socket is not open"),
    )
}

const DRIVER_CODE: &str = "spark.endpoint.tcp.driver_failed";

/// 驱动任务异常结束。
///
/// # 教案式说明
/// - **意图 (Why)**：端点状态机在契约违例时直接 panic，驱动任务随之终止；
///   [`EndpointHandle::stop`](crate::EndpointHandle::stop) 借此把异常带回调用方；
/// - **契约 (What)**：`code()` 返回稳定错误码 `spark.endpoint.tcp.driver_failed`。
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("endpoint driver task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl DriverError {
    pub fn code(&self) -> &'static str {
        DRIVER_CODE
    }
}
