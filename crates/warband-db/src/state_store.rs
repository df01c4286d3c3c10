//! Upserts and reloads of mirrored engine state.
//!
//! Each committed operation produces a [`StateChanges`] set; the mirror
//! writes it in one transaction with [`StateStore::apply_changes`]. On
//! startup the engine reloads the open session from the same tables.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;
use warband_types::{
    ActionKind, Agent, AgentId, Alliance, AllianceId, AllianceStatus, Battle, BattleOutcome,
    BattleStatus, BattleType, Cooldown, GameEndReason, GameId, GameSession, IgnoreRecord, Position,
    StateChanges,
};

use crate::error::DbError;

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// Storage label of a serde-named enum variant.
fn label<T: Serialize>(value: &T) -> Result<String, DbError> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(DbError::InvalidRow(format!("not a unit variant: {other}"))),
    }
}

fn parse_label<T: DeserializeOwned>(raw: &str) -> Result<T, DbError> {
    Ok(serde_json::from_value(serde_json::Value::String(raw.to_owned()))?)
}

fn db_agent(id: AgentId) -> i64 {
    i64::from(id.get())
}

fn agent_from_db(raw: i64) -> Result<AgentId, DbError> {
    u32::try_from(raw)
        .map(AgentId)
        .map_err(|_e| DbError::InvalidRow(format!("agent id out of range: {raw}")))
}

fn db_game(id: GameId) -> Result<i64, DbError> {
    i64::try_from(id.get()).map_err(|_e| DbError::InvalidRow(format!("game id out of range: {id}")))
}

fn db_amount(amount: u64) -> Result<i64, DbError> {
    i64::try_from(amount).map_err(|_e| DbError::InvalidRow(format!("balance out of range: {amount}")))
}

fn side_from_db(raw: &[i64]) -> Result<Vec<AgentId>, DbError> {
    raw.iter().map(|id| agent_from_db(*id)).collect()
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// A row from the `game_sessions` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    /// Settlement program game id.
    pub game_id: i64,
    /// Whether actions are accepted.
    pub active: bool,
    /// When the session opened.
    pub started_at: DateTime<Utc>,
    /// When it closed.
    pub ended_at: Option<DateTime<Utc>>,
    /// Why it closed.
    pub end_reason: Option<String>,
}

impl TryFrom<SessionRow> for GameSession {
    type Error = DbError;

    fn try_from(row: SessionRow) -> Result<Self, DbError> {
        let game_id = u64::try_from(row.game_id)
            .map(GameId)
            .map_err(|_e| DbError::InvalidRow(format!("game id out of range: {}", row.game_id)))?;
        Ok(Self {
            game_id,
            active: row.active,
            started_at: row.started_at,
            ended_at: row.ended_at,
            end_reason: row
                .end_reason
                .as_deref()
                .map(parse_label::<GameEndReason>)
                .transpose()?,
        })
    }
}

/// A row from the `agents` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AgentRow {
    /// Agent id.
    pub agent_id: i64,
    /// Display name.
    pub name: String,
    /// Horizontal coordinate.
    pub x: i32,
    /// Vertical coordinate.
    pub y: i32,
    /// Alive flag.
    pub alive: bool,
    /// Mirrored balance.
    pub token_balance: i64,
    /// Alliance partner.
    pub alliance_with: Option<i64>,
    /// Last move.
    pub last_move: Option<DateTime<Utc>>,
    /// Last battle resolution.
    pub last_battle: Option<DateTime<Utc>>,
    /// Last alliance change.
    pub last_alliance: Option<DateTime<Utc>>,
    /// Open-battle marker.
    pub battle_started_at: Option<DateTime<Utc>>,
}

impl TryFrom<AgentRow> for Agent {
    type Error = DbError;

    fn try_from(row: AgentRow) -> Result<Self, DbError> {
        let token_balance = u64::try_from(row.token_balance)
            .map_err(|_e| DbError::InvalidRow(format!("negative balance: {}", row.token_balance)))?;
        Ok(Self {
            id: agent_from_db(row.agent_id)?,
            name: row.name,
            position: Position::new(row.x, row.y),
            alive: row.alive,
            token_balance,
            alliance_with: row.alliance_with.map(agent_from_db).transpose()?,
            last_move: row.last_move,
            last_battle: row.last_battle,
            last_alliance: row.last_alliance,
            battle_started_at: row.battle_started_at,
        })
    }
}

/// A row from the `alliances` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AllianceRow {
    /// Record id.
    pub alliance_id: Uuid,
    /// Lower member id.
    pub member_low: i64,
    /// Higher member id.
    pub member_high: i64,
    /// Lifecycle label.
    pub status: String,
    /// Formation time.
    pub formed_at: DateTime<Utc>,
    /// Dissolution time.
    pub dissolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<AllianceRow> for Alliance {
    type Error = DbError;

    fn try_from(row: AllianceRow) -> Result<Self, DbError> {
        Ok(Self {
            id: AllianceId(row.alliance_id),
            members: (agent_from_db(row.member_low)?, agent_from_db(row.member_high)?),
            status: parse_label::<AllianceStatus>(&row.status)?,
            formed_at: row.formed_at,
            dissolved_at: row.dissolved_at,
        })
    }
}

/// A row from the `cooldowns` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CooldownRow {
    /// Agent id.
    pub agent_id: i64,
    /// Action kind label.
    pub kind: String,
    /// Expiry.
    pub expires_at: DateTime<Utc>,
}

impl TryFrom<CooldownRow> for Cooldown {
    type Error = DbError;

    fn try_from(row: CooldownRow) -> Result<Self, DbError> {
        Ok(Self {
            agent: agent_from_db(row.agent_id)?,
            kind: parse_label::<ActionKind>(&row.kind)?,
            expires_at: row.expires_at,
        })
    }
}

/// A row from the `ignores` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IgnoreRow {
    /// Ignoring agent.
    pub actor_id: i64,
    /// Ignored agent.
    pub target_id: i64,
    /// End of the window.
    pub expires_at: DateTime<Utc>,
}

impl TryFrom<IgnoreRow> for IgnoreRecord {
    type Error = DbError;

    fn try_from(row: IgnoreRow) -> Result<Self, DbError> {
        Ok(Self {
            actor: agent_from_db(row.actor_id)?,
            target: agent_from_db(row.target_id)?,
            expires_at: row.expires_at,
        })
    }
}

/// A row from the `battles` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BattleRow {
    /// Shared marker.
    pub started_at: DateTime<Utc>,
    /// Topology label.
    pub battle_type: String,
    /// Side A ids.
    pub side_a: Vec<i64>,
    /// Side B ids.
    pub side_b: Vec<i64>,
    /// Lifecycle label.
    pub status: String,
    /// Serialized outcome.
    pub outcome: Option<serde_json::Value>,
    /// Resolution time.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<BattleRow> for Battle {
    type Error = DbError;

    fn try_from(row: BattleRow) -> Result<Self, DbError> {
        Ok(Self {
            started_at: row.started_at,
            battle_type: parse_label::<BattleType>(&row.battle_type)?,
            side_a: side_from_db(&row.side_a)?,
            side_b: side_from_db(&row.side_b)?,
            status: parse_label::<BattleStatus>(&row.status)?,
            outcome: row
                .outcome
                .map(serde_json::from_value::<BattleOutcome>)
                .transpose()?,
            resolved_at: row.resolved_at,
        })
    }
}

/// Everything needed to rebuild an open session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// The session.
    pub session: GameSession,
    /// Every agent, dead ones included.
    pub agents: Vec<Agent>,
    /// Alliance history.
    pub alliances: Vec<Alliance>,
    /// Cooldown rows still open.
    pub cooldowns: Vec<Cooldown>,
    /// Ignore windows still open.
    pub ignores: Vec<IgnoreRecord>,
    /// Battles still waiting for resolution.
    pub battles: Vec<Battle>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Operations on the mirrored state tables.
pub struct StateStore<'a> {
    pool: &'a PgPool,
}

impl<'a> StateStore<'a> {
    /// Create a store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Write a change set in one transaction.
    ///
    /// The session row goes first so the foreign keys hold for a brand-new
    /// game.
    pub async fn apply_changes(&self, game: GameId, changes: &StateChanges) -> Result<(), DbError> {
        if changes.is_empty() {
            return Ok(());
        }
        let game_id = db_game(game)?;
        let mut tx = self.pool.begin().await?;
        if let Some(session) = &changes.session {
            upsert_session(&mut tx, session).await?;
        }
        upsert_agents(&mut tx, game_id, &changes.agents).await?;
        upsert_alliances(&mut tx, game_id, &changes.alliances).await?;
        upsert_cooldowns(&mut tx, game_id, &changes.cooldowns).await?;
        upsert_ignores(&mut tx, game_id, &changes.ignores).await?;
        upsert_battles(&mut tx, game_id, &changes.battles).await?;
        tx.commit().await?;

        tracing::debug!(
            game_id = %game,
            agents = changes.agents.len(),
            battles = changes.battles.len(),
            "Mirrored state changes"
        );
        Ok(())
    }

    /// Insert or update the session row.
    pub async fn save_session(&self, session: &GameSession) -> Result<(), DbError> {
        let mut conn = self.pool.acquire().await?;
        upsert_session(&mut conn, session).await
    }

    /// The most recently started open session, if any.
    pub async fn latest_active_session(&self) -> Result<Option<GameSession>, DbError> {
        let row = sqlx::query_as::<_, SessionRow>(
            r"SELECT game_id, active, started_at, ended_at, end_reason
              FROM game_sessions
              WHERE active
              ORDER BY started_at DESC
              LIMIT 1",
        )
        .fetch_optional(self.pool)
        .await?;
        row.map(GameSession::try_from).transpose()
    }

    /// Reload a session and its live state.
    ///
    /// Expired cooldown rows and closed ignore windows are skipped.
    pub async fn load_session(
        &self,
        game: GameId,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionSnapshot>, DbError> {
        let game_id = db_game(game)?;
        let Some(session) = sqlx::query_as::<_, SessionRow>(
            r"SELECT game_id, active, started_at, ended_at, end_reason
              FROM game_sessions WHERE game_id = $1",
        )
        .bind(game_id)
        .fetch_optional(self.pool)
        .await?
        else {
            return Ok(None);
        };

        let agents = sqlx::query_as::<_, AgentRow>(
            r"SELECT agent_id, name, x, y, alive, token_balance, alliance_with,
                     last_move, last_battle, last_alliance, battle_started_at
              FROM agents WHERE game_id = $1 ORDER BY agent_id",
        )
        .bind(game_id)
        .fetch_all(self.pool)
        .await?;

        let alliances = sqlx::query_as::<_, AllianceRow>(
            r"SELECT alliance_id, member_low, member_high, status, formed_at, dissolved_at
              FROM alliances WHERE game_id = $1 ORDER BY formed_at, alliance_id",
        )
        .bind(game_id)
        .fetch_all(self.pool)
        .await?;

        let cooldowns = sqlx::query_as::<_, CooldownRow>(
            r"SELECT agent_id, kind, expires_at
              FROM cooldowns WHERE game_id = $1 AND expires_at > $2",
        )
        .bind(game_id)
        .bind(now)
        .fetch_all(self.pool)
        .await?;

        let ignores = sqlx::query_as::<_, IgnoreRow>(
            r"SELECT actor_id, target_id, expires_at
              FROM ignores WHERE game_id = $1 AND expires_at > $2",
        )
        .bind(game_id)
        .bind(now)
        .fetch_all(self.pool)
        .await?;

        let battles = sqlx::query_as::<_, BattleRow>(
            r"SELECT started_at, battle_type, side_a, side_b, status, outcome, resolved_at
              FROM battles WHERE game_id = $1 AND status = 'active' ORDER BY started_at",
        )
        .bind(game_id)
        .fetch_all(self.pool)
        .await?;

        Ok(Some(SessionSnapshot {
            session: GameSession::try_from(session)?,
            agents: agents.into_iter().map(Agent::try_from).collect::<Result<_, _>>()?,
            alliances: alliances
                .into_iter()
                .map(Alliance::try_from)
                .collect::<Result<_, _>>()?,
            cooldowns: cooldowns
                .into_iter()
                .map(Cooldown::try_from)
                .collect::<Result<_, _>>()?,
            ignores: ignores
                .into_iter()
                .map(IgnoreRecord::try_from)
                .collect::<Result<_, _>>()?,
            battles: battles.into_iter().map(Battle::try_from).collect::<Result<_, _>>()?,
        }))
    }

    /// Delete history that closed before `cutoff`.
    ///
    /// Removes expired cooldown and ignore rows, resolved battles, and
    /// dissolved alliances. Returns the number of rows deleted.
    pub async fn prune_history(&self, game: GameId, cutoff: DateTime<Utc>) -> Result<u64, DbError> {
        let game_id = db_game(game)?;
        let mut tx = self.pool.begin().await?;
        let mut removed: u64 = 0;
        for sql in [
            "DELETE FROM cooldowns WHERE game_id = $1 AND expires_at < $2",
            "DELETE FROM ignores WHERE game_id = $1 AND expires_at < $2",
            "DELETE FROM battles WHERE game_id = $1 AND status = 'resolved' AND resolved_at < $2",
            "DELETE FROM alliances WHERE game_id = $1 AND status = 'dissolved' AND dissolved_at < $2",
            "DELETE FROM narrative_events WHERE game_id = $1 AND occurred_at < $2",
        ] {
            let result = sqlx::query(sql)
                .bind(game_id)
                .bind(cutoff)
                .execute(&mut *tx)
                .await?;
            removed = removed.saturating_add(result.rows_affected());
        }
        tx.commit().await?;
        tracing::info!(game_id = %game, removed, %cutoff, "Pruned mirror history");
        Ok(removed)
    }
}

async fn upsert_session(conn: &mut PgConnection, session: &GameSession) -> Result<(), DbError> {
    sqlx::query(
        r"INSERT INTO game_sessions (game_id, active, started_at, ended_at, end_reason)
          VALUES ($1, $2, $3, $4, $5)
          ON CONFLICT (game_id) DO UPDATE SET
            active = EXCLUDED.active,
            ended_at = EXCLUDED.ended_at,
            end_reason = EXCLUDED.end_reason",
    )
    .bind(db_game(session.game_id)?)
    .bind(session.active)
    .bind(session.started_at)
    .bind(session.ended_at)
    .bind(session.end_reason.as_ref().map(label).transpose()?)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn upsert_agents(conn: &mut PgConnection, game_id: i64, agents: &[Agent]) -> Result<(), DbError> {
    if agents.is_empty() {
        return Ok(());
    }
    let len = agents.len();
    let mut ids = Vec::with_capacity(len);
    let mut names = Vec::with_capacity(len);
    let mut xs = Vec::with_capacity(len);
    let mut ys = Vec::with_capacity(len);
    let mut alive = Vec::with_capacity(len);
    let mut balances = Vec::with_capacity(len);
    let mut partners: Vec<Option<i64>> = Vec::with_capacity(len);
    let mut last_moves = Vec::with_capacity(len);
    let mut last_battles = Vec::with_capacity(len);
    let mut last_alliances = Vec::with_capacity(len);
    let mut markers = Vec::with_capacity(len);

    // Later snapshots of the same agent win; keep only the last one so the
    // UNNEST upsert never touches a row twice.
    let mut latest: std::collections::BTreeMap<AgentId, &Agent> = std::collections::BTreeMap::new();
    for agent in agents {
        latest.insert(agent.id, agent);
    }
    for agent in latest.values() {
        ids.push(db_agent(agent.id));
        names.push(agent.name.clone());
        xs.push(agent.position.x);
        ys.push(agent.position.y);
        alive.push(agent.alive);
        balances.push(db_amount(agent.token_balance)?);
        partners.push(agent.alliance_with.map(db_agent));
        last_moves.push(agent.last_move);
        last_battles.push(agent.last_battle);
        last_alliances.push(agent.last_alliance);
        markers.push(agent.battle_started_at);
    }

    sqlx::query(
        r"INSERT INTO agents (game_id, agent_id, name, x, y, alive, token_balance, alliance_with,
                             last_move, last_battle, last_alliance, battle_started_at)
          SELECT $1, * FROM UNNEST($2::BIGINT[], $3::TEXT[], $4::INTEGER[], $5::INTEGER[],
                                   $6::BOOLEAN[], $7::BIGINT[], $8::BIGINT[], $9::TIMESTAMPTZ[],
                                   $10::TIMESTAMPTZ[], $11::TIMESTAMPTZ[], $12::TIMESTAMPTZ[])
          ON CONFLICT (game_id, agent_id) DO UPDATE SET
            name = EXCLUDED.name,
            x = EXCLUDED.x,
            y = EXCLUDED.y,
            alive = EXCLUDED.alive,
            token_balance = EXCLUDED.token_balance,
            alliance_with = EXCLUDED.alliance_with,
            last_move = EXCLUDED.last_move,
            last_battle = EXCLUDED.last_battle,
            last_alliance = EXCLUDED.last_alliance,
            battle_started_at = EXCLUDED.battle_started_at,
            updated_at = now()",
    )
    .bind(game_id)
    .bind(&ids)
    .bind(&names)
    .bind(&xs)
    .bind(&ys)
    .bind(&alive)
    .bind(&balances)
    .bind(&partners)
    .bind(&last_moves)
    .bind(&last_battles)
    .bind(&last_alliances)
    .bind(&markers)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn upsert_alliances(
    conn: &mut PgConnection,
    game_id: i64,
    alliances: &[Alliance],
) -> Result<(), DbError> {
    for alliance in alliances {
        sqlx::query(
            r"INSERT INTO alliances (alliance_id, game_id, member_low, member_high, status,
                                    formed_at, dissolved_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7)
              ON CONFLICT (alliance_id) DO UPDATE SET
                status = EXCLUDED.status,
                dissolved_at = EXCLUDED.dissolved_at",
        )
        .bind(alliance.id.into_inner())
        .bind(game_id)
        .bind(db_agent(alliance.members.0))
        .bind(db_agent(alliance.members.1))
        .bind(alliance.status.as_str())
        .bind(alliance.formed_at)
        .bind(alliance.dissolved_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn upsert_cooldowns(
    conn: &mut PgConnection,
    game_id: i64,
    cooldowns: &[Cooldown],
) -> Result<(), DbError> {
    for cooldown in cooldowns {
        sqlx::query(
            r"INSERT INTO cooldowns (game_id, agent_id, kind, expires_at)
              VALUES ($1, $2, $3, $4)
              ON CONFLICT (game_id, agent_id, kind) DO UPDATE SET
                expires_at = EXCLUDED.expires_at",
        )
        .bind(game_id)
        .bind(db_agent(cooldown.agent))
        .bind(cooldown.kind.as_str())
        .bind(cooldown.expires_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn upsert_ignores(
    conn: &mut PgConnection,
    game_id: i64,
    ignores: &[IgnoreRecord],
) -> Result<(), DbError> {
    for record in ignores {
        sqlx::query(
            r"INSERT INTO ignores (game_id, actor_id, target_id, expires_at)
              VALUES ($1, $2, $3, $4)
              ON CONFLICT (game_id, actor_id, target_id) DO UPDATE SET
                expires_at = EXCLUDED.expires_at",
        )
        .bind(game_id)
        .bind(db_agent(record.actor))
        .bind(db_agent(record.target))
        .bind(record.expires_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn upsert_battles(conn: &mut PgConnection, game_id: i64, battles: &[Battle]) -> Result<(), DbError> {
    for battle in battles {
        let side_a: Vec<i64> = battle.side_a.iter().copied().map(db_agent).collect();
        let side_b: Vec<i64> = battle.side_b.iter().copied().map(db_agent).collect();
        let outcome = battle
            .outcome
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        sqlx::query(
            r"INSERT INTO battles (game_id, started_at, battle_type, side_a, side_b, status,
                                  outcome, resolved_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
              ON CONFLICT (game_id, started_at) DO UPDATE SET
                status = EXCLUDED.status,
                outcome = EXCLUDED.outcome,
                resolved_at = EXCLUDED.resolved_at",
        )
        .bind(game_id)
        .bind(battle.started_at)
        .bind(battle.battle_type.as_str())
        .bind(&side_a)
        .bind(&side_b)
        .bind(battle.status.as_str())
        .bind(outcome)
        .bind(battle.resolved_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}
