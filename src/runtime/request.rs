//! 请求及其生命周期。

use std::collections::HashMap;

use super::{AgentId, RequestId, SimulationError, Time};

/// 请求的终止状态
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    Pending,
    Replied,
    Rejected,
}

/// 由发送方发往接收方的请求
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub sender: AgentId,
    pub receiver: AgentId,
    /// 请求的操作，裸请求没有操作名
    pub operation: Option<String>,
    emission_time: Time,
    completion_time: Option<Time>,
    status: Status,
}

impl Request {
    pub(crate) fn new(
        id: RequestId,
        sender: AgentId,
        receiver: AgentId,
        operation: Option<String>,
        emission_time: Time,
    ) -> Self {
        Self {
            id,
            sender,
            receiver,
            operation,
            emission_time,
            completion_time: None,
            status: Status::Pending,
        }
    }

    pub fn emission_time(&self) -> Time {
        self.emission_time
    }

    pub fn completion_time(&self) -> Option<Time> {
        self.completion_time
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_replied(&self) -> bool {
        self.status == Status::Replied
    }

    pub fn is_rejected(&self) -> bool {
        self.status == Status::Rejected
    }

    /// 响应时间，只有在请求被回复后才有定义。
    pub fn response_time(&self) -> Result<Time, SimulationError> {
        match self.completion_time {
            Some(completion) if self.is_replied() => Ok(completion - self.emission_time),
            _ => Err(SimulationError::InvalidState(format!(
                "response time of {} is not available before completion",
                self.id
            ))),
        }
    }

    pub(crate) fn mark_replied(&mut self, now: Time) -> Result<(), SimulationError> {
        self.ensure_pending("reply")?;
        self.completion_time = Some(now);
        self.status = Status::Replied;
        Ok(())
    }

    pub(crate) fn mark_rejected(&mut self) -> Result<(), SimulationError> {
        self.ensure_pending("reject")?;
        self.status = Status::Rejected;
        Ok(())
    }

    fn ensure_pending(&self, transition: &str) -> Result<(), SimulationError> {
        match self.status {
            Status::Pending => Ok(()),
            status => Err(SimulationError::InvalidState(format!(
                "cannot {} {}, it is already {:?}",
                transition, self.id, status
            ))),
        }
    }
}

/// 所有尚未通知发送方的请求
#[derive(Default)]
pub(crate) struct Requests {
    next: usize,
    live: HashMap<RequestId, Request>,
}

impl Requests {
    pub fn open(
        &mut self,
        sender: AgentId,
        receiver: AgentId,
        operation: Option<String>,
        now: Time,
    ) -> RequestId {
        let id = RequestId(self.next);
        self.next += 1;
        self.live
            .insert(id, Request::new(id, sender, receiver, operation, now));
        id
    }

    pub fn get(&self, id: RequestId) -> Result<&Request, SimulationError> {
        self.live.get(&id).ok_or(SimulationError::UnknownRequest(id))
    }

    pub fn get_mut(&mut self, id: RequestId) -> Result<&mut Request, SimulationError> {
        self.live
            .get_mut(&id)
            .ok_or(SimulationError::UnknownRequest(id))
    }

    /// 发送方收到通知后，请求就不再需要了
    pub fn close(&mut self, id: RequestId) -> Option<Request> {
        self.live.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn opened(&self) -> usize {
        self.next
    }
}
