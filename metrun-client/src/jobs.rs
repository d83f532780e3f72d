//! Step and queue requests

use crate::ControllerClient;
use crate::error::{ClientError, Result};
use metrun_core::domain::controller::ControllerState;
use metrun_core::domain::queue::QueueItem;
use metrun_core::protocol::{NONE_MARKER, Request, SET_WD_REPLY, STOP_REPLY, unescape_reply};

impl ControllerClient {
    // =============================================================================
    // Step Lifecycle
    // =============================================================================

    /// Queue a command
    ///
    /// # Arguments
    /// * `argv` - Program and arguments; a trailing `>file` redirects stdout
    ///
    /// # Returns
    /// The pid assigned to the step
    pub async fn start(&mut self, argv: Vec<String>) -> Result<u64> {
        let request = Request::Start(argv);
        let reply = self.request(&request).await?;
        reply
            .parse()
            .map_err(|_| ClientError::unexpected(request.encode().unwrap_or_default(), reply))
    }

    /// Get the controller state
    ///
    /// Reading `finished` resets the controller to `idle`.
    pub async fn status(&mut self) -> Result<ControllerState> {
        let reply = self.request(&Request::Status).await?;
        reply
            .parse()
            .map_err(|_| ClientError::unexpected("status", reply))
    }

    /// Get the captured output of a completed step
    ///
    /// # Returns
    /// `None` while the step has not completed, or when it printed nothing
    pub async fn retval(&mut self, pid: u64) -> Result<Option<String>> {
        let reply = self.request(&Request::Retval(pid)).await?;
        Ok((reply != NONE_MARKER).then(|| unescape_reply(&reply)))
    }

    /// List the running step followed by the waiting ones
    pub async fn queue(&mut self) -> Result<Vec<QueueItem>> {
        let reply = self.request(&Request::Queue).await?;
        Ok(QueueItem::parse_list(&reply))
    }

    /// Stop the running step and discard the queue
    pub async fn stop(&mut self) -> Result<()> {
        let reply = self.request(&Request::Stop).await?;
        expect_reply("stop", reply, STOP_REPLY)
    }

    /// Set the directory external commands run in
    pub async fn set_wd(&mut self, dir: impl Into<String>) -> Result<()> {
        let reply = self.request(&Request::SetWd(dir.into())).await?;
        expect_reply("set_wd", reply, SET_WD_REPLY)
    }
}

pub(crate) fn expect_reply(request: &str, reply: String, expected: &str) -> Result<()> {
    if reply == expected {
        Ok(())
    } else {
        Err(ClientError::unexpected(request, reply))
    }
}

#[cfg(test)]
mod tests {
    use crate::ControllerClient;
    use crate::error::ClientError;
    use crate::tests::fake_controller;
    use metrun_core::domain::controller::ControllerState;
    use metrun_core::domain::queue::QueueItem;

    #[tokio::test]
    async fn test_step_requests() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("metrun.sock");
        let server = fake_controller(
            &socket,
            vec![
                ("start echo hello", "4"),
                ("status", "running"),
                ("queue", "echo:running|kraken:waiting"),
                ("retval 3", "None"),
                ("retval 4", "42"),
                ("retval 5", r"line one\nline two"),
                ("set_wd /data/run1", "Seems fair."),
                ("stop", "I'll ask the controller to stop."),
            ],
        );

        let mut client = ControllerClient::connect(&socket).await.unwrap();
        let argv = vec!["echo".into(), "hello".into()];
        assert_eq!(client.start(argv).await.unwrap(), 4);
        assert_eq!(client.status().await.unwrap(), ControllerState::Running);
        assert_eq!(
            client.queue().await.unwrap(),
            [QueueItem::running("echo"), QueueItem::waiting("kraken")]
        );
        assert_eq!(client.retval(3).await.unwrap(), None);
        assert_eq!(client.retval(4).await.unwrap().as_deref(), Some("42"));
        assert_eq!(
            client.retval(5).await.unwrap().as_deref(),
            Some("line one\nline two")
        );
        client.set_wd("/data/run1").await.unwrap();
        client.stop().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_echoed_status_is_unexpected() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("metrun.sock");
        let server = fake_controller(&socket, vec![("status", "status: ?")]);

        let mut client = ControllerClient::connect(&socket).await.unwrap();
        assert!(matches!(
            client.status().await,
            Err(ClientError::UnexpectedReply { .. })
        ));
        server.await.unwrap();
    }
}
