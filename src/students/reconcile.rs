use std::collections::{HashMap, HashSet};

use super::{dto::SkillInput, repo_types::StudentSkill};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSkill {
    pub name: String,
    pub years_of_experience: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillUpdate {
    pub id: i64,
    pub name: String,
    pub years_of_experience: i32,
}

/// Writes needed to turn the stored skill set into the requested one.
/// Applied in the order deletes, updates, inserts.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SkillPlan {
    pub updates: Vec<SkillUpdate>,
    pub inserts: Vec<NewSkill>,
    pub deletes: Vec<i64>,
}

impl SkillPlan {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.inserts.is_empty() && self.deletes.is_empty()
    }
}

fn skill_name(raw: Option<&str>) -> AppResult<String> {
    raw.map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::bad_request("Skill name is required"))
}

fn skill_years(raw: Option<i32>, name: &str) -> AppResult<i32> {
    match raw {
        None => Err(AppError::bad_request(format!(
            "yearsOfExperience is required for skill {}",
            name
        ))),
        Some(y) if y < 0 => Err(AppError::bad_request(format!(
            "yearsOfExperience for skill {} must not be negative",
            name
        ))),
        Some(y) => Ok(y),
    }
}

fn new_skill(input: &SkillInput) -> AppResult<NewSkill> {
    let name = skill_name(input.name.as_deref())?;
    let years_of_experience = skill_years(input.years_of_experience, &name)?;
    Ok(NewSkill {
        name,
        years_of_experience,
    })
}

fn duplicate(name: &str) -> AppError {
    AppError::conflict(format!("Skill {} is listed more than once", name))
}

/// Skills submitted with a new profile. Ids are ignored; any invalid or
/// repeated entry rejects the whole list.
pub fn validate_new_skills(items: &[SkillInput]) -> AppResult<Vec<NewSkill>> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let skill = new_skill(item)?;
        if !seen.insert(skill.name.clone()) {
            return Err(duplicate(&skill.name));
        }
        out.push(skill);
    }
    Ok(out)
}

/// Reconciles `incoming` against the student's current skills by id.
///
/// Entries with an id update that skill; entries without one are new and
/// may not reuse the name of any current skill. Current skills missing
/// from `incoming` are deleted. The resulting set must not contain the
/// same name twice, renames included.
pub fn plan_skill_sync(existing: &[StudentSkill], incoming: &[SkillInput]) -> AppResult<SkillPlan> {
    let by_id: HashMap<i64, &StudentSkill> = existing.iter().map(|s| (s.id, s)).collect();
    let mut kept = HashSet::new();
    let mut final_names = HashSet::new();
    let mut plan = SkillPlan::default();

    for item in incoming {
        let Some(id) = item.id else { continue };
        let current = by_id
            .get(&id)
            .ok_or_else(|| AppError::not_found(format!("Skill with id {} not found", id)))?;
        if !kept.insert(id) {
            return Err(AppError::bad_request(format!(
                "Skill with id {} is listed more than once",
                id
            )));
        }

        let name = match item.name.as_deref() {
            Some(_) => skill_name(item.name.as_deref())?,
            None => current.name.clone(),
        };
        let years_of_experience = match item.years_of_experience {
            Some(_) => skill_years(item.years_of_experience, &name)?,
            None => current.years_of_experience,
        };
        if !final_names.insert(name.clone()) {
            return Err(duplicate(&name));
        }
        if name != current.name || years_of_experience != current.years_of_experience {
            plan.updates.push(SkillUpdate {
                id,
                name,
                years_of_experience,
            });
        }
    }

    let existing_names: HashSet<&str> = existing.iter().map(|s| s.name.as_str()).collect();
    for item in incoming.iter().filter(|i| i.id.is_none()) {
        let skill = new_skill(item)?;
        if existing_names.contains(skill.name.as_str()) {
            return Err(AppError::conflict(format!(
                "Skill {} already exists for this student",
                skill.name
            )));
        }
        if !final_names.insert(skill.name.clone()) {
            return Err(duplicate(&skill.name));
        }
        plan.inserts.push(skill);
    }

    plan.deletes = existing
        .iter()
        .map(|s| s.id)
        .filter(|id| !kept.contains(id))
        .collect();
    Ok(plan)
}
