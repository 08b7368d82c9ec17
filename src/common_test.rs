use crate::common::*;
use crate::error::*;
use crate::remote::RemoteError;

#[test]
fn test_uniq_keeps_first_occurrence() {
    let xs = vec!["b", "a", "b", "c", "a"];
    assert_eq!(uniq(xs), vec!["b", "a", "c"]);
}

#[test]
fn test_uniq_empty() {
    let xs: Vec<String> = Vec::new();
    assert!(uniq(xs).is_empty());
}

#[test]
fn test_classification_default_is_unclassified() {
    let playlist = PlaylistDescriptor::new("p1", "🎵 Collection", "me");
    assert_eq!(playlist.classification, Classification::Unclassified);
    assert!(playlist.revision_token.is_empty());
}

#[test]
fn test_classification_display() {
    assert_eq!(Classification::MatchedByArtist { artist: "Bass Man".to_string() }.to_string(), "artist:Bass Man");
    assert_eq!(Classification::MatchedByGenre { genre: "K-Pop".to_string() }.to_string(), "genre:K-Pop");
    assert_eq!(Classification::Unclassified.to_string(), "unclassified");
}

#[test]
fn test_classification_serializes_tagged() {
    let json = serde_json::to_string(&Classification::MatchedByGenre { genre: "Jazz".to_string() }).unwrap();
    assert_eq!(json, r#"{"kind":"matched_by_genre","genre":"Jazz"}"#);
    let back: Classification = serde_json::from_str(r#"{"kind":"unclassified"}"#).unwrap();
    assert_eq!(back, Classification::Unclassified);
}

#[test]
fn test_descriptor_without_classification_deserializes() {
    let json = r#"{"id":"p1","name":"Mix","owner":"me","revision_token":"r1","track_count":3}"#;
    let playlist: PlaylistDescriptor = serde_json::from_str(json).unwrap();
    assert_eq!(playlist.classification, Classification::Unclassified);
    assert_eq!(playlist.track_count, 3);
}

#[test]
fn test_remote_errors_convert_by_kind() {
    let auth: FlowError = RemoteError::auth("token expired").into();
    assert!(matches!(auth, FlowError::Auth(_)));
    let other: FlowError = RemoteError::server(503, "busy").into();
    assert!(matches!(other, FlowError::Remote(_)));
    assert_eq!(other.to_string(), "Remote error: remote error (HTTP 503): busy");
}

#[test]
fn test_expected_error_messages() {
    let err = FlowExpectedError::CacheSchemaMismatch { path: "/tmp/playlists.json".into(), expected: 1, got: 2 };
    assert_eq!(err.to_string(), "Cache schema mismatch in /tmp/playlists.json: expected version 1, got 2");
    let wrapped: FlowError = err.clone().into();
    assert_eq!(wrapped.to_string(), err.to_string());
}
