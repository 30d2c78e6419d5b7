//! Pure routing of rumqttc events
//!
//! The poll loop in [`super::binding`] only acts on the route returned here,
//! which keeps the packet matching testable without a broker.

use bytes::Bytes;
use rumqttc::{ConnectReturnCode, Event, Packet, SubscribeReasonCode};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => match connack.code {
                    ConnectReturnCode::Success => EventRoute::ConnectionAcknowledged,
                    code => EventRoute::ConnectionRefused(format!("{code:?}")),
                },
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                },
                Packet::Disconnect => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    failed: suback
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure)),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Broker answered CONNECT with a refusal code
    ConnectionRefused(String),
    /// Message received on subscribed topic
    MessageReceived { topic: String, payload: Bytes },
    /// MQTT broker disconnected
    Disconnected,
    /// Subscription acknowledged; `failed` if the broker rejected any filter
    SubscriptionConfirmed { packet_id: u16, failed: bool },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, Outgoing, Publish, QoS, SubAck};

    #[test]
    fn test_route_connack() {
        let event = Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::Success,
            false,
        )));
        assert_eq!(
            MessageHandler::route_mqtt_event(&event),
            EventRoute::ConnectionAcknowledged
        );
    }

    #[test]
    fn test_route_refused_connack() {
        let event = Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::NotAuthorized,
            false,
        )));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&event),
            EventRoute::ConnectionRefused(reason) if reason.contains("NotAuthorized")
        ));
    }

    #[test]
    fn test_route_publish() {
        let publish = Publish::new(
            "ricebot/cooking_progress",
            QoS::AtMostOnce,
            r#"{"progress":42}"#,
        );
        let event = Event::Incoming(Packet::Publish(publish));

        match MessageHandler::route_mqtt_event(&event) {
            EventRoute::MessageReceived { topic, payload } => {
                assert_eq!(topic, "ricebot/cooking_progress");
                assert_eq!(payload, Bytes::from_static(br#"{"progress":42}"#));
            }
            other => panic!("unexpected route: {other:?}"),
        }
    }

    #[test]
    fn test_route_disconnect() {
        let event = Event::Incoming(Packet::Disconnect);
        assert_eq!(
            MessageHandler::route_mqtt_event(&event),
            EventRoute::Disconnected
        );
    }

    #[test]
    fn test_route_suback() {
        let ok = Event::Incoming(Packet::SubAck(SubAck::new(
            7,
            vec![SubscribeReasonCode::Success(QoS::AtMostOnce)],
        )));
        assert_eq!(
            MessageHandler::route_mqtt_event(&ok),
            EventRoute::SubscriptionConfirmed {
                packet_id: 7,
                failed: false
            }
        );

        let rejected = Event::Incoming(Packet::SubAck(SubAck::new(
            8,
            vec![SubscribeReasonCode::Failure],
        )));
        assert_eq!(
            MessageHandler::route_mqtt_event(&rejected),
            EventRoute::SubscriptionConfirmed {
                packet_id: 8,
                failed: true
            }
        );
    }

    #[test]
    fn test_route_infrastructure_and_outgoing() {
        let ping = Event::Incoming(Packet::PingResp);
        assert!(matches!(
            MessageHandler::route_mqtt_event(&ping),
            EventRoute::InfrastructureEvent(_)
        ));

        let outgoing = Event::Outgoing(Outgoing::PingReq);
        assert_eq!(
            MessageHandler::route_mqtt_event(&outgoing),
            EventRoute::OutgoingEvent
        );
    }
}
