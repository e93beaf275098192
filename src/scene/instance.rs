//! Instance - a group placed in the world by an affine transform.

use std::sync::Arc;

use super::surface::UniformAttributes;
use super::{uniform_vec4, Attribute, GroupScene};
use crate::core::{ObjectContext, ObjectImpl, ObjectRef, ParameterTable};
use crate::util::{DataType, Mat4};

/// Render-time view of one instance.
#[derive(Debug, Clone)]
pub(crate) struct InstanceData {
    pub id: u32,
    pub xfm: Mat4,
    pub inv_xfm: Mat4,
    pub uniforms: UniformAttributes,
    pub group: Arc<GroupScene>,
}

#[derive(Debug)]
pub(crate) struct Instance {
    group: Option<ObjectRef>,
    xfm: Mat4,
    id: u32,
    uniforms: UniformAttributes,
}

impl Instance {
    pub fn new() -> Self {
        Self {
            group: None,
            xfm: Mat4::IDENTITY,
            id: u32::MAX,
            uniforms: Default::default(),
        }
    }

    pub fn group(&self) -> Option<&ObjectRef> {
        self.group.as_ref()
    }

    pub fn transform(&self) -> Mat4 {
        self.xfm
    }

    /// Current transform and group contents.
    pub fn snapshot(&self) -> Option<InstanceData> {
        let group = self.group.as_ref()?.read().as_group()?.scene();
        Some(InstanceData {
            id: self.id,
            xfm: self.xfm,
            inv_xfm: self.xfm.inverse(),
            uniforms: self.uniforms,
            group,
        })
    }
}

impl ObjectImpl for Instance {
    fn commit_parameters(&mut self, params: &ParameterTable, ctx: &ObjectContext<'_>) {
        self.group = params.get_object("group", DataType::Group);
        if self.group.is_none() {
            ctx.warn("missing 'group' on instance");
        }
        self.xfm = params.get_or("transform", Mat4::IDENTITY);
        self.id = params.get_or("id", u32::MAX);
        for attr in Attribute::ALL {
            self.uniforms[attr.index()] = uniform_vec4(params, attr.name());
        }
    }

    fn is_valid(&self) -> bool {
        self.group.as_ref().is_some_and(|g| g.is_valid()) && self.xfm.determinant() != 0.0
    }
}
