use axum::Extension;
use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::auth::AuthUser;
use crate::{proceeds, Error, Payload};

pub async fn get_stats(
    _auth: AuthUser,
    Extension(pg): Extension<PgPool>,
) -> Payload<DashboardStats> {
    let today = Utc.from_utc_datetime(&NaiveDateTime::new(
        Utc::now().date_naive(),
        NaiveTime::MIN,
    ));
    let tomorrow = today + Duration::days(1);
    let yesterday = today - Duration::days(1);

    let current = day_stats(&pg, today, tomorrow).await?;
    let previous = day_stats(&pg, yesterday, today).await?;

    proceeds(DashboardStats {
        classes: Metric {
            value: current.total_classes,
            change: signed(current.total_classes - previous.total_classes),
        },
        attendees: Metric {
            value: current.total_attendees,
            change: signed(current.total_attendees - previous.total_attendees),
        },
        training_hours: Metric {
            value: format!("{}h", current.total_hours),
            change: format!("{}h", signed(current.total_hours - previous.total_hours)),
        },
        completion_rate: Metric {
            value: format!("{}%", current.completion_rate.round() as i64),
            change: format!(
                "{}%",
                signed((current.completion_rate - previous.completion_rate).round() as i64)
            ),
        },
    })
}

struct DayStats {
    total_classes: i64,
    total_attendees: i64,
    total_hours: i64,
    completion_rate: f64,
}

async fn day_stats(
    pg: &PgPool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<DayStats, Error> {
    let total_classes: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM classes WHERE date_start >= $1 AND date_start < $2",
    )
    .bind(start)
    .bind(end)
    .fetch_one(pg)
    .await
    .map_err(Error::from)?;

    let total_attendees: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM class_participants p \
         JOIN classes c ON c.id = p.class_id \
         WHERE c.date_start >= $1 AND c.date_start < $2",
    )
    .bind(start)
    .bind(end)
    .fetch_one(pg)
    .await
    .map_err(Error::from)?;

    // whole hours per completed class, summed
    let total_hours: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(FLOOR(EXTRACT(EPOCH FROM (date_end - date_start)) / 3600)), 0)::BIGINT \
         FROM classes \
         WHERE date_start >= $1 AND date_start < $2 AND status = 'completed'",
    )
    .bind(start)
    .bind(end)
    .fetch_one(pg)
    .await
    .map_err(Error::from)?;

    let completed: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM classes \
         WHERE date_start >= $1 AND date_start < $2 AND status = 'completed'",
    )
    .bind(start)
    .bind(end)
    .fetch_one(pg)
    .await
    .map_err(Error::from)?;

    let completion_rate = if total_classes > 0 {
        (completed as f64 / total_classes as f64) * 100.0
    } else {
        0.0
    };

    Ok(DayStats {
        total_classes,
        total_attendees,
        total_hours,
        completion_rate,
    })
}

fn signed(delta: i64) -> String {
    if delta >= 0 {
        format!("+{}", delta)
    } else {
        delta.to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Metric<T: Serialize> {
    pub value: T,
    pub change: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub classes: Metric<i64>,
    pub attendees: Metric<i64>,
    #[serde(rename = "trainingHours")]
    pub training_hours: Metric<String>,
    #[serde(rename = "completionRate")]
    pub completion_rate: Metric<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_always_carry_a_sign() {
        assert_eq!(signed(3), "+3");
        assert_eq!(signed(0), "+0");
        assert_eq!(signed(-2), "-2");
    }

    #[test]
    fn stats_serialize_in_dashboard_shape() {
        let stats = DashboardStats {
            classes: Metric {
                value: 4,
                change: signed(1),
            },
            attendees: Metric {
                value: 20,
                change: signed(-3),
            },
            training_hours: Metric {
                value: "6h".to_string(),
                change: "+2h".to_string(),
            },
            completion_rate: Metric {
                value: "50%".to_string(),
                change: "-25%".to_string(),
            },
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["classes"]["value"], 4);
        assert_eq!(json["classes"]["change"], "+1");
        assert_eq!(json["trainingHours"]["value"], "6h");
        assert_eq!(json["completionRate"]["change"], "-25%");
    }
}
