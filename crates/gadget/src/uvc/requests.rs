//! UVC class request handling
//!
//! Answers setup packets and consumes the data stage that follows a
//! SET_CUR. Holds no device state: the caller sends the responses and
//! applies committed formats.

use crate::negotiator::{Negotiation, NegotiationAction, Negotiator};
use common::{ControlTable, LookupError};
use protocol::{
    CONTROL_CAP_GET, CONTROL_CAP_SET, ControlInterface, CtrlRequest, INTERFACE_CONTROL,
    INTERFACE_STREAMING, RequestCode, RequestData, RequestErrorCode, StreamingControl,
    StreamingSelector, VC_REQUEST_ERROR_CODE_CONTROL, request_code_name,
};
use tracing::{debug, warn};

/// Which streaming record a SET_CUR targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTarget {
    Probe,
    Commit,
}

/// Effect of a data stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataOutcome {
    /// Probe record renegotiated
    Probe(Negotiation),
    /// Commit record renegotiated; the format should be applied
    Commit(Negotiation),
    /// Control value stored
    Control { name: &'static str, value: i32 },
    /// Nothing was armed, or the payload was rejected
    Ignored,
}

#[derive(Debug, Clone)]
pub struct RequestProcessor {
    armed_stream: Option<StreamTarget>,
    armed_control: Option<(ControlInterface, u8)>,
    error_code: RequestErrorCode,
    probe: StreamingControl,
    commit: StreamingControl,
}

impl RequestProcessor {
    /// Probe and commit start out as the Init negotiation
    pub fn new(negotiator: &Negotiator) -> Self {
        let initial = negotiator.negotiate(NegotiationAction::Init, 0, 0).control;
        Self {
            armed_stream: None,
            armed_control: None,
            error_code: RequestErrorCode::NoError,
            probe: initial,
            commit: initial,
        }
    }

    pub fn probe(&self) -> &StreamingControl {
        &self.probe
    }

    pub fn commit(&self) -> &StreamingControl {
        &self.commit
    }

    pub fn error_code(&self) -> RequestErrorCode {
        self.error_code
    }

    pub fn armed_stream(&self) -> Option<StreamTarget> {
        self.armed_stream
    }

    fn record(&self, target: StreamTarget) -> &StreamingControl {
        match target {
            StreamTarget::Probe => &self.probe,
            StreamTarget::Commit => &self.commit,
        }
    }

    /// Build the response to a setup packet
    pub fn setup(
        &mut self,
        request: &CtrlRequest,
        controls: &ControlTable,
        negotiator: &Negotiator,
    ) -> RequestData {
        self.armed_stream = None;
        self.armed_control = None;

        if !request.is_class() {
            debug!("non-class request {:#04x} stalled", request.request);
            return RequestData::stall();
        }
        if !request.is_interface_recipient() {
            debug!("class request for non-interface recipient ignored");
            return RequestData::empty();
        }

        match request.interface() {
            INTERFACE_CONTROL => self.control_request(request, controls),
            INTERFACE_STREAMING => self.streaming_request(request, negotiator),
            other => {
                debug!("request for unknown interface {}", other);
                RequestData::stall()
            }
        }
    }

    fn control_request(&mut self, request: &CtrlRequest, controls: &ControlTable) -> RequestData {
        let selector = request.selector();

        if request.entity() == 0 {
            if selector == VC_REQUEST_ERROR_CODE_CONTROL {
                return RequestData::with_payload(&[self.error_code as u8]);
            }
            return RequestData::stall();
        }

        let Some(interface) = ControlInterface::from_entity(request.entity()) else {
            debug!("request for unknown entity {}", request.entity());
            return RequestData::stall();
        };
        let code_name = request_code_name(request.request);

        let entry = match controls.lookup(interface, selector) {
            Ok(entry) => entry,
            Err(LookupError::Missing) => {
                debug!("{} - {} - {:#04x} - UNSUPPORTED", interface.name(), code_name, selector);
                self.error_code = RequestErrorCode::InvalidControl;
                return RequestData::stall();
            }
            Err(LookupError::Disabled { name }) => {
                debug!("{} - {} - {} - DISABLED", interface.name(), code_name, name);
                self.error_code = RequestErrorCode::InvalidControl;
                return RequestData::stall();
            }
        };

        debug!("{} - {} - {}", interface.name(), code_name, entry.name);

        let value = match RequestCode::from_u8(request.request) {
            Some(RequestCode::SetCur) => {
                self.armed_control = Some((interface, selector));
                self.error_code = RequestErrorCode::NoError;
                let mut response = RequestData::empty();
                response.length = i32::from(request.length).min(RequestData::CAPACITY as i32);
                return response;
            }
            Some(RequestCode::GetInfo) => {
                self.error_code = RequestErrorCode::NoError;
                return RequestData::with_payload(&[CONTROL_CAP_GET | CONTROL_CAP_SET]);
            }
            Some(RequestCode::GetCur) => entry.current_value,
            Some(RequestCode::GetMin) => entry.minimum,
            Some(RequestCode::GetMax) => entry.maximum,
            Some(RequestCode::GetDef) => entry.default_value,
            Some(RequestCode::GetRes) => entry.step,
            _ => {
                self.error_code = RequestErrorCode::InvalidRequest;
                return RequestData::stall();
            }
        };

        self.error_code = RequestErrorCode::NoError;
        RequestData::with_payload(&value.to_le_bytes())
    }

    fn streaming_request(&mut self, request: &CtrlRequest, negotiator: &Negotiator) -> RequestData {
        let target = match StreamingSelector::from_u8(request.selector()) {
            Some(StreamingSelector::Probe) => StreamTarget::Probe,
            Some(StreamingSelector::Commit) => StreamTarget::Commit,
            other => {
                debug!(
                    "streaming request {} for unsupported selector {:?}",
                    request_code_name(request.request),
                    other
                );
                return RequestData::empty();
            }
        };

        debug!(
            "streaming request {:?} {}",
            target,
            request_code_name(request.request)
        );

        let record = match RequestCode::from_u8(request.request) {
            Some(RequestCode::SetCur) => {
                self.armed_stream = Some(target);
                let mut response = RequestData::empty();
                response.length = StreamingControl::SIZE as i32;
                return response;
            }
            Some(RequestCode::GetMax) => negotiator.negotiate(NegotiationAction::Max, 0, 0).control,
            Some(RequestCode::GetMin) | Some(RequestCode::GetDef) => {
                negotiator.negotiate(NegotiationAction::Min, 0, 0).control
            }
            Some(RequestCode::GetCur) => *self.record(target),
            Some(RequestCode::GetRes) => StreamingControl::default(),
            Some(RequestCode::GetLen) => {
                return RequestData::with_payload(&[0x00, StreamingControl::SIZE as u8]);
            }
            Some(RequestCode::GetInfo) => {
                return RequestData::with_payload(&[CONTROL_CAP_GET | CONTROL_CAP_SET]);
            }
            _ => {
                self.error_code = RequestErrorCode::InvalidRequest;
                return RequestData::stall();
            }
        };

        RequestData::with_payload(&record.encode())
    }

    /// Consume the data stage of an earlier SET_CUR
    pub fn data(
        &mut self,
        data: &RequestData,
        controls: &mut ControlTable,
        negotiator: &Negotiator,
    ) -> DataOutcome {
        if let Some(target) = self.armed_stream {
            let proposal = match StreamingControl::decode(data.payload()) {
                Ok(proposal) => proposal,
                Err(e) => {
                    warn!("malformed {:?} data stage: {}", target, e);
                    return DataOutcome::Ignored;
                }
            };

            let negotiation = negotiator.negotiate(
                NegotiationAction::Set,
                proposal.format_index,
                proposal.frame_index,
            );
            return match target {
                StreamTarget::Probe => {
                    self.probe = negotiation.control;
                    DataOutcome::Probe(negotiation)
                }
                StreamTarget::Commit => {
                    self.commit = negotiation.control;
                    DataOutcome::Commit(negotiation)
                }
            };
        }

        if let Some((interface, selector)) = self.armed_control {
            let payload = data.payload();
            if controls.set_current(interface, selector, payload) {
                if let Ok(entry) = controls.lookup(interface, selector) {
                    return DataOutcome::Control {
                        name: entry.name,
                        value: entry.current_value,
                    };
                }
            }
            debug!(
                "{} control {:#04x}: {} byte data stage rejected",
                interface.name(),
                selector,
                data.length
            );
            return DataOutcome::Ignored;
        }

        debug!("data stage with nothing armed, length {}", data.length);
        DataOutcome::Ignored
    }
}
