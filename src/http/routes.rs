//! Route Tree
//!
//! The warp filter composition for the REST surface. Handlers live in
//! `handlers`; every route passes the shared context and the raw
//! `Authorization` header through.

use std::convert::Infallible;

use uuid::Uuid;
use warp::filters::BoxedFilter;
use warp::reply::Response;
use warp::Filter;

use crate::http::handlers::{self, ApiContext, CreateGameRequest, MoveRequest};

/// Request body cap; boards and move payloads are tiny.
const BODY_LIMIT: u64 = 16 * 1024;

fn with_ctx(ctx: ApiContext) -> impl Filter<Extract = (ApiContext,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

fn auth_header() -> impl Filter<Extract = (Option<String>,), Error = warp::Rejection> + Clone {
    warp::header::optional::<String>("authorization")
}

/// Build the full route tree.
pub fn routes(ctx: ApiContext) -> BoxedFilter<(Response,)> {
    let health = warp::path("health")
        .and(warp::get())
        .and(warp::path::end())
        .and_then(|| async { Ok::<_, Infallible>(handlers::health().await) });

    let create_game = warp::path!("api" / "game" / "create")
        .and(warp::post())
        .and(with_ctx(ctx.clone()))
        .and(auth_header())
        .and(warp::body::content_length_limit(BODY_LIMIT))
        .and(warp::body::json())
        .and_then(
            |ctx: ApiContext, auth: Option<String>, request: CreateGameRequest| async move {
                Ok::<_, Infallible>(handlers::create_game(ctx, auth, request).await)
            },
        );

    let get_game = warp::path!("api" / "game" / Uuid)
        .and(warp::get())
        .and(with_ctx(ctx.clone()))
        .and(auth_header())
        .and_then(|game_id: Uuid, ctx: ApiContext, auth: Option<String>| async move {
            Ok::<_, Infallible>(handlers::get_game(ctx, auth, game_id).await)
        });

    let post_move = warp::path!("api" / "game" / Uuid / "move")
        .and(warp::post())
        .and(with_ctx(ctx.clone()))
        .and(auth_header())
        .and(warp::body::content_length_limit(BODY_LIMIT))
        .and(warp::body::json())
        .and_then(
            |game_id: Uuid, ctx: ApiContext, auth: Option<String>, request: MoveRequest| async move {
                Ok::<_, Infallible>(handlers::post_move(ctx, auth, game_id, request).await)
            },
        );

    let post_forfeit = warp::path!("api" / "game" / Uuid / "forfeit")
        .and(warp::post())
        .and(with_ctx(ctx.clone()))
        .and(auth_header())
        .and_then(|game_id: Uuid, ctx: ApiContext, auth: Option<String>| async move {
            Ok::<_, Infallible>(handlers::post_forfeit(ctx, auth, game_id).await)
        });

    let get_moves = warp::path!("api" / "game" / Uuid / "moves")
        .and(warp::get())
        .and(with_ctx(ctx.clone()))
        .and(auth_header())
        .and_then(|game_id: Uuid, ctx: ApiContext, auth: Option<String>| async move {
            Ok::<_, Infallible>(handlers::get_moves(ctx, auth, game_id).await)
        });

    let join_queue = warp::path!("api" / "matchmaking" / "queue")
        .and(warp::post())
        .and(with_ctx(ctx.clone()))
        .and(auth_header())
        .and_then(|ctx: ApiContext, auth: Option<String>| async move {
            Ok::<_, Infallible>(handlers::join_queue(ctx, auth).await)
        });

    let leave_queue = warp::path!("api" / "matchmaking" / "queue")
        .and(warp::delete())
        .and(with_ctx(ctx.clone()))
        .and(auth_header())
        .and_then(|ctx: ApiContext, auth: Option<String>| async move {
            Ok::<_, Infallible>(handlers::leave_queue(ctx, auth).await)
        });

    let queue_status = warp::path!("api" / "matchmaking" / "status")
        .and(warp::get())
        .and(with_ctx(ctx))
        .and(auth_header())
        .and_then(|ctx: ApiContext, auth: Option<String>| async move {
            Ok::<_, Infallible>(handlers::queue_status(ctx, auth).await)
        });

    health
        .or(create_game)
        .unify()
        .or(get_game)
        .unify()
        .or(post_move)
        .unify()
        .or(post_forfeit)
        .unify()
        .or(get_moves)
        .unify()
        .or(join_queue)
        .unify()
        .or(leave_queue)
        .unify()
        .or(queue_status)
        .unify()
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AiBridge, AiBridgeConfig};
    use crate::events::log::{EventLog, TopicSpec};
    use crate::events::producer::EventProducer;
    use crate::events::types::{
        QueueEvent, TOPIC_DEAD_LETTER, TOPIC_GAME_MOVE, TOPIC_MATCH_CREATED, TOPIC_QUEUE_EVENTS,
    };
    use crate::network::auth::{AuthConfig, TokenClaims};
    use crate::network::broadcaster::Broadcaster;
    use crate::persistence::storage::{GameStore, InMemoryGameStore};
    use crate::play::PlayService;
    use crate::store::session_store::SessionStore;
    use chrono::Duration as ChronoDuration;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::sync::Arc;
    use std::time::Duration;

    const SECRET: &str = "test-secret-key-256-bits-long!!";

    struct Fixture {
        routes: BoxedFilter<(Response,)>,
        play: Arc<PlayService>,
        log: Arc<EventLog>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(
            EventLog::open(
                dir.path(),
                vec![
                    TopicSpec::new(TOPIC_QUEUE_EVENTS, 1, ChronoDuration::days(7)),
                    TopicSpec::new(TOPIC_MATCH_CREATED, 3, ChronoDuration::days(7)),
                    TopicSpec::new(TOPIC_GAME_MOVE, 3, ChronoDuration::days(7)),
                    TopicSpec::new(TOPIC_DEAD_LETTER, 1, ChronoDuration::days(30)),
                ],
            )
            .unwrap(),
        );
        let play = Arc::new(PlayService::new(
            Arc::new(SessionStore::new()),
            Arc::new(Broadcaster::new()),
            EventProducer::new(log.clone()),
            Arc::new(AiBridge::new(AiBridgeConfig {
                base_url: "http://127.0.0.1:9".into(),
                timeout: Duration::from_millis(200),
            })),
            Arc::new(InMemoryGameStore::new()) as Arc<dyn GameStore>,
        ));
        let ctx = ApiContext {
            play: play.clone(),
            producer: EventProducer::new(log.clone()),
            auth: AuthConfig {
                secret: Some(SECRET.into()),
                ..Default::default()
            },
        };
        Fixture {
            routes: routes(ctx),
            play,
            log,
            _dir: dir,
        }
    }

    fn bearer(user: &str) -> String {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let claims = TokenClaims {
            sub: user.into(),
            exp: now + 3600,
            iat: now,
            iss: None,
            aud: None,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        format!("Bearer {token}")
    }

    #[tokio::test]
    async fn test_health() {
        let fx = fixture();
        let response = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&fx.routes)
            .await;
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_create_game_requires_auth() {
        let fx = fixture();
        let response = warp::test::request()
            .method("POST")
            .path("/api/game/create")
            .json(&serde_json::json!({"gameType": "HUMAN_VS_AI", "aiDifficulty": "MEDIUM"}))
            .reply(&fx.routes)
            .await;
        assert_eq!(response.status(), 401);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["status"], 401);
        assert_eq!(body["path"], "/api/game/create");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_create_ai_game() {
        let fx = fixture();
        let response = warp::test::request()
            .method("POST")
            .path("/api/game/create")
            .header("authorization", bearer("alice"))
            .json(&serde_json::json!({"gameType": "HUMAN_VS_AI", "aiDifficulty": "HARD"}))
            .reply(&fx.routes)
            .await;
        assert_eq!(response.status(), 201);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert!(body["gameId"].is_string());
        assert_eq!(body["gameType"], "HUMAN_VS_AI");
        assert!(body["websocketTopic"]
            .as_str()
            .unwrap()
            .starts_with("/topic/game/"));
    }

    #[tokio::test]
    async fn test_create_pvp_requires_opponent() {
        let fx = fixture();
        let response = warp::test::request()
            .method("POST")
            .path("/api/game/create")
            .header("authorization", bearer("alice"))
            .json(&serde_json::json!({"gameType": "HUMAN_VS_HUMAN"}))
            .reply(&fx.routes)
            .await;
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_self_challenge_rejected() {
        let fx = fixture();
        let response = warp::test::request()
            .method("POST")
            .path("/api/game/create")
            .header("authorization", bearer("alice"))
            .json(&serde_json::json!({"gameType": "HUMAN_VS_HUMAN", "player2Id": "alice"}))
            .reply(&fx.routes)
            .await;
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_get_game_participant_only() {
        let fx = fixture();
        let view = fx.play.create_direct_game("alice", "bob").await.unwrap();

        let ok = warp::test::request()
            .method("GET")
            .path(&format!("/api/game/{}", view.game_id))
            .header("authorization", bearer("bob"))
            .reply(&fx.routes)
            .await;
        assert_eq!(ok.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(ok.body()).unwrap();
        assert_eq!(body["status"], "IN_PROGRESS");
        assert_eq!(body["currentPlayer"], 1);

        let forbidden = warp::test::request()
            .method("GET")
            .path(&format!("/api/game/{}", view.game_id))
            .header("authorization", bearer("mallory"))
            .reply(&fx.routes)
            .await;
        assert_eq!(forbidden.status(), 403);
    }

    #[tokio::test]
    async fn test_get_game_not_found() {
        let fx = fixture();
        let response = warp::test::request()
            .method("GET")
            .path(&format!("/api/game/{}", uuid::Uuid::new_v4()))
            .header("authorization", bearer("alice"))
            .reply(&fx.routes)
            .await;
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_rest_move_rejected_for_pvp() {
        let fx = fixture();
        let view = fx.play.create_direct_game("alice", "bob").await.unwrap();
        let response = warp::test::request()
            .method("POST")
            .path(&format!("/api/game/{}/move", view.game_id))
            .header("authorization", bearer("alice"))
            .json(&serde_json::json!({"row": 7, "col": 7}))
            .reply(&fx.routes)
            .await;
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_rest_move_pvai_applies_human_move() {
        // Oracle unreachable: the human move lands, the AI turn stays
        // pending, and the endpoint still returns 200.
        let fx = fixture();
        let view = fx
            .play
            .create_ai_game("alice", crate::game::session::AiDifficulty::Easy)
            .await
            .unwrap();

        let response = warp::test::request()
            .method("POST")
            .path(&format!("/api/game/{}/move", view.game_id))
            .header("authorization", bearer("alice"))
            .json(&serde_json::json!({"row": 7, "col": 7}))
            .reply(&fx.routes)
            .await;
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["moveCount"], 1);
        assert_eq!(body["currentPlayer"], 2);
        assert_eq!(body["board"][7][7], 1);
    }

    #[tokio::test]
    async fn test_rest_move_out_of_bounds() {
        let fx = fixture();
        let view = fx
            .play
            .create_ai_game("alice", crate::game::session::AiDifficulty::Easy)
            .await
            .unwrap();

        let response = warp::test::request()
            .method("POST")
            .path(&format!("/api/game/{}/move", view.game_id))
            .header("authorization", bearer("alice"))
            .json(&serde_json::json!({"row": 15, "col": 0}))
            .reply(&fx.routes)
            .await;
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_forfeit_endpoint() {
        let fx = fixture();
        let view = fx.play.create_direct_game("alice", "bob").await.unwrap();
        let response = warp::test::request()
            .method("POST")
            .path(&format!("/api/game/{}/forfeit", view.game_id))
            .header("authorization", bearer("bob"))
            .reply(&fx.routes)
            .await;
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["status"], "ABANDONED");
        assert_eq!(body["winnerType"], "PLAYER1");

        // Forfeiting a finished game conflicts.
        let again = warp::test::request()
            .method("POST")
            .path(&format!("/api/game/{}/forfeit", view.game_id))
            .header("authorization", bearer("alice"))
            .reply(&fx.routes)
            .await;
        assert_eq!(again.status(), 409);
    }

    #[tokio::test]
    async fn test_moves_listing_ordered() {
        let fx = fixture();
        let view = fx.play.create_direct_game("alice", "bob").await.unwrap();
        fx.play.human_move(view.game_id, "alice", 7, 7).await.unwrap();
        fx.play.human_move(view.game_id, "bob", 8, 8).await.unwrap();

        let response = warp::test::request()
            .method("GET")
            .path(&format!("/api/game/{}/moves", view.game_id))
            .header("authorization", bearer("alice"))
            .reply(&fx.routes)
            .await;
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        let moves = body.as_array().unwrap();
        assert_eq!(moves.len(), 2);
        assert_eq!(moves[0]["moveNumber"], 1);
        assert_eq!(moves[1]["moveNumber"], 2);
        assert_eq!(moves[0]["stoneColor"], "BLACK");
    }

    #[tokio::test]
    async fn test_queue_join_appends_event() {
        let fx = fixture();
        let response = warp::test::request()
            .method("POST")
            .path("/api/matchmaking/queue")
            .header("authorization", bearer("alice"))
            .reply(&fx.routes)
            .await;
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["status"], "JOINED");
        assert!(body["joinedAt"].is_string());

        let records = fx.log.read_from(TOPIC_QUEUE_EVENTS, 0, 0).await.unwrap();
        assert_eq!(records.len(), 1);
        let event: QueueEvent = records[0].decode().unwrap();
        assert_eq!(event.player_id, "alice");
    }

    #[tokio::test]
    async fn test_queue_leave_appends_event() {
        let fx = fixture();
        let response = warp::test::request()
            .method("DELETE")
            .path("/api/matchmaking/queue")
            .header("authorization", bearer("alice"))
            .reply(&fx.routes)
            .await;
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["status"], "LEFT");
    }

    #[tokio::test]
    async fn test_queue_status_is_push_only() {
        let fx = fixture();
        let response = warp::test::request()
            .method("GET")
            .path("/api/matchmaking/status")
            .header("authorization", bearer("alice"))
            .reply(&fx.routes)
            .await;
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["status"], "NOT_IN_QUEUE");
        assert_eq!(body["inQueue"], false);
    }

    #[tokio::test]
    async fn test_queue_requires_auth() {
        let fx = fixture();
        let response = warp::test::request()
            .method("POST")
            .path("/api/matchmaking/queue")
            .reply(&fx.routes)
            .await;
        assert_eq!(response.status(), 401);
    }
}
