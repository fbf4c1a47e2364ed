use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomPayload {
    pub room_id: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EditPayload {
    pub active_file: String,
    pub data: String,
    pub room_id: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VisibleFilesPayload {
    pub visible_files: Vec<String>,
    pub room_id: i64,
}

/// Events received from a client over the socket.
#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "event", content = "payload")]
pub enum ClientEvent {
    #[serde(rename = "join-room")]
    JoinRoom(JoinRoomPayload),
    #[serde(rename = "message")]
    Message(EditPayload),
    #[serde(rename = "visible-files")]
    VisibleFiles(VisibleFilesPayload),
}

/// Events sent to a client over the socket.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "event", content = "payload")]
pub enum ServerEvent {
    #[serde(rename = "message")]
    Message {
        #[serde(rename = "activeFile")]
        active_file: String,
        data: String,
    },
    #[serde(rename = "sync-visible-files")]
    SyncVisibleFiles {
        #[serde(rename = "visibleFiles")]
        visible_files: Vec<String>,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

/// A server event fanned out to the connections of one room on this
/// instance. `origin` is the connection the event came from, so its own
/// socket task can skip the echo.
#[derive(Debug, Clone)]
pub struct RoomBroadcast {
    pub origin: String,
    pub event: ServerEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_deserialize_from_wire_format() {
        let join: ClientEvent =
            serde_json::from_str(r#"{"event":"join-room","payload":{"roomId":7}}"#).unwrap();
        match join {
            ClientEvent::JoinRoom(p) => assert_eq!(p.room_id, 7),
            other => panic!("wrong variant: {other:?}"),
        }

        let edit: ClientEvent = serde_json::from_str(
            r#"{"event":"message","payload":{"activeFile":"main.py","data":"x=1","roomId":7}}"#,
        )
        .unwrap();
        match edit {
            ClientEvent::Message(p) => {
                assert_eq!(p.active_file, "main.py");
                assert_eq!(p.data, "x=1");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn server_error_event_serializes_with_message() {
        let frame = serde_json::to_string(&ServerEvent::Error {
            message: "Room ID Not Found".to_string(),
        })
        .unwrap();
        assert_eq!(
            frame,
            r#"{"event":"error","payload":{"message":"Room ID Not Found"}}"#
        );
    }
}
